use crossterm::style::Stylize;

/// Sink for the user-facing side of a run: step banners, `(i/total)` lines,
/// warnings and errors.
pub trait Progress: Send + Sync {
    fn step(&self, message: &str);
    fn item(&self, index: usize, total: usize, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    /// Unprefixed line, used for listings
    fn line(&self, message: &str);
}

/// Prints to stdout and mirrors every message into the log.
pub struct ConsoleProgress;

impl Progress for ConsoleProgress {
    fn step(&self, message: &str) {
        log::info!("{}", message);
        println!("{} {}", "::".blue().bold(), message.bold());
    }

    fn item(&self, index: usize, total: usize, message: &str) {
        log::info!("({}/{}) {}", index, total, message);
        println!("({}/{}) {}", index, total, message);
    }

    fn warn(&self, message: &str) {
        log::warn!("{}", message);
        println!("{}{}", "warning: ".yellow().bold(), message);
    }

    fn error(&self, message: &str) {
        log::error!("{}", message);
        println!("{}{}", "error: ".red().bold(), message);
    }

    fn line(&self, message: &str) {
        log::info!("{}", message);
        println!("{}", message);
    }
}
