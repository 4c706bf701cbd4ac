use console::Style;

const BANNER: &str = r#"
 ████████╗ ██████╗  ██╗ ███╗   ██╗ ██╗ ████████╗ ██╗   ██╗
 ╚══██╔══╝ ██╔══██╗ ██║ ████╗  ██║ ██║ ╚══██╔══╝ ╚██╗ ██╔╝
    ██║    ██████╔╝ ██║ ██╔██╗ ██║ ██║    ██║     ╚████╔╝
    ██║    ██╔══██╗ ██║ ██║╚██╗██║ ██║    ██║      ╚██╔╝
    ██║    ██║  ██║ ██║ ██║ ╚████║ ██║    ██║       ██║
    ╚═╝    ╚═╝  ╚═╝ ╚═╝ ╚═╝  ╚═══╝ ╚═╝    ╚═╝       ╚═╝"#;

/// Print the TRINITY startup banner with version info.
pub fn print_banner() {
    let gold = Style::new().yellow().bold();
    let dim = Style::new().dim();

    println!("{}", gold.apply_to(BANNER));
    println!(
        "  {}",
        dim.apply_to(format!(
            "v{} · 2-of-3 consensus over Ethereum, Solana and TON",
            env!("CARGO_PKG_VERSION")
        ))
    );
    println!();
}
