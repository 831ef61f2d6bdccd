use colored::Colorize;

fn main() {
    if let Err(err) = hive_cli::run() {
        eprintln!("{} {}", "Error:".red().bold(), err);
        std::process::exit(1);
    }
}
