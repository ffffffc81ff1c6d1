mod apps;
mod config;
mod devices;

use anyhow::Result;

use crate::Commands;

/// Run a one-shot CLI command.
pub async fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Apps => apps::run().await,
        Commands::Devices => devices::run(),
        Commands::Config { command } => config::run(command),
        Commands::Daemon { .. } => unreachable!("daemon command handled in main"),
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        &s[..s.floor_char_boundary(max_len)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(truncate("mpv", 19), "mpv");
        assert_eq!(truncate("spotify", 7), "spotify");
        assert_eq!(truncate("", 3), "");
    }

    #[test]
    fn long_names_are_cut() {
        assert_eq!(truncate("org.mozilla.firefox", 11), "org.mozilla");
        assert_eq!(truncate("mpv", 0), "");
    }

    #[test]
    fn cut_never_splits_a_character() {
        // "Ä" takes two bytes; a cut inside it backs off to before it
        assert_eq!(truncate("Äudio", 1), "");
        assert_eq!(truncate("Äudio", 2), "Ä");
        assert_eq!(truncate("xÄ", 2), "x");
    }
}
