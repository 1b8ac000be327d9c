use std::path::Path;

pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "m4a"];

pub fn is_supported_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    SUPPORTED_AUDIO_EXTENSIONS.contains(&ext.as_str())
}

/// Width of the attached terminal, falling back to 60 columns when detached.
pub fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(cols, _)| cols as usize)
        .unwrap_or(60)
        .clamp(20, 100)
}

pub fn rule(ch: char) -> String {
    std::iter::repeat(ch).take(terminal_width()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extensions_match_case_insensitively() {
        assert!(is_supported_file(Path::new("take1.wav")));
        assert!(is_supported_file(Path::new("TAKE1.WAV")));
        assert!(is_supported_file(Path::new("take1.mp3")));
        assert!(is_supported_file(Path::new("mix.Flac")));
        assert!(is_supported_file(Path::new("voice.m4a")));
        assert!(!is_supported_file(Path::new("take1.ogg")));
        assert!(!is_supported_file(Path::new("README")));
    }
}
