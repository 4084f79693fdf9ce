use std::path::Path;
use std::sync::Mutex;

use crate::progress::Progress;

/// Collects progress output so tests can assert on it.
#[derive(Default)]
pub struct RecordingProgress {
    lines: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl Progress for RecordingProgress {
    fn step(&self, message: &str) {
        self.push(format!(":: {}", message));
    }

    fn item(&self, index: usize, total: usize, message: &str) {
        self.push(format!("({}/{}) {}", index, total, message));
    }

    fn warn(&self, message: &str) {
        self.push(format!("warning: {}", message));
    }

    fn error(&self, message: &str) {
        self.push(format!("error: {}", message));
    }

    fn line(&self, message: &str) {
        self.push(message.to_string());
    }
}

pub fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

pub fn write_file(directory: &Path, name: &str, contents: &[u8]) {
    std::fs::write(directory.join(name), contents).unwrap();
}

/// Sorted file names directly inside `directory`
pub fn dir_listing(directory: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(directory)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}
