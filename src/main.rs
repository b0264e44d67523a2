fn main() {
    if handle_cli_flags() {
        return;
    }

    if let Err(err) = feedline::run() {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("feedline {}", feedline::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "feedline: read your home feed from the terminal.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n\nConfiguration is read from {} and FEEDLINE_* environment variables.",
                    config_location()
                );
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}

fn config_location() -> String {
    feedline::config::default_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "~/.config/feedline/config.yaml".to_string())
}
