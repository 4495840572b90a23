use atelier_config::AppConfig;

/// Print the startup banner with a config summary.
pub fn print_banner(config: &AppConfig) {
    let version = env!("CARGO_PKG_VERSION");

    let url = format!("http://{}", config.gateway.bind_addr());
    let db_path = config.database_path();
    let db_display = match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => db_path.to_string_lossy().replace(&home, "~"),
        _ => db_path.to_string_lossy().to_string(),
    };
    let origins = if config.security.cors_origins.is_empty() {
        "none".to_string()
    } else {
        config.security.cors_origins.join(", ")
    };
    let limit = &config.security.rate_limit;

    // Layout
    let width = 70;
    let left_w = 27;
    let right_w = width - left_w - 3; // 3 for "│ " + "│"

    let title = format!("Atelier v{version}");
    let title_dashes = width - 2 - title.len() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let row = |l: &str, r: &str| format!("│ {:<left_w$}│  {:<right_w$}│", l, r);
    let clip = |s: &str| -> String {
        let max = right_w - 12;
        let chars: Vec<char> = s.chars().collect();
        if chars.len() > max {
            let tail: String = chars[chars.len() - (max - 1)..].iter().collect();
            format!("…{tail}")
        } else {
            s.to_string()
        }
    };

    println!("{top}");
    println!("{}", row("", ""));
    println!("{}", row("  Atelier back office", "Gateway"));
    println!("{}", row("", &url));
    println!("{}", row("     ___________", &"─".repeat(right_w - 2)));
    println!(
        "{}",
        row("    |  _______  |", &format!("Environment {}", config.environment))
    );
    println!(
        "{}",
        row("    | |       | |", &format!("Store       {}", clip(&db_display)))
    );
    println!(
        "{}",
        row("    |_|_______|_|", &format!("CORS        {}", clip(&origins)))
    );
    println!(
        "{}",
        row(
            "",
            &format!("Rate limit  {}/{}s", limit.max_requests, limit.window_secs)
        )
    );
    println!("{}", row("", "Press Ctrl+C to stop"));
    println!("{}", row("", ""));
    println!("{bottom}");
}
