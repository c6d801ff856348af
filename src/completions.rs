use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap_complete::{generate, Shell};

use crate::app::AppError;

const BIN_NAME: &str = "papermind";

pub fn generate_completions(shell: Shell, buf: &mut dyn Write) {
    let mut cmd = crate::cli::styled_command();
    generate(shell, &mut cmd, BIN_NAME, buf);
}

fn shell_from_name(raw: &str) -> Option<Shell> {
    let name = raw.trim().rsplit('/').next()?.to_ascii_lowercase();
    match name.as_str() {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "powershell" | "pwsh" => Some(Shell::PowerShell),
        _ => None,
    }
}

pub fn detect_current_shell() -> Option<Shell> {
    shell_from_name(&std::env::var("SHELL").ok()?)
}

fn install_path(shell: Shell, home: &Path) -> Option<PathBuf> {
    match shell {
        Shell::Bash => Some(home.join(".local/share/bash-completion/completions").join(BIN_NAME)),
        Shell::Zsh => Some(home.join(".config/papermind/completions/_papermind")),
        Shell::Fish => Some(home.join(".config/fish/completions/papermind.fish")),
        _ => None,
    }
}

/// Writes the completion script for `shell` under `home`. Zsh also gets a
/// `source` line appended to `.zshrc` once.
pub fn install_completions(shell: Shell, home: &Path) -> io::Result<PathBuf> {
    let path = install_path(shell, home).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no install path for {shell:?}"),
        )
    })?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut script = Vec::new();
    generate_completions(shell, &mut script);
    fs::write(&path, script)?;

    if shell == Shell::Zsh {
        source_from_zshrc(home, &path)?;
    }
    Ok(path)
}

fn source_from_zshrc(home: &Path, script: &Path) -> io::Result<()> {
    let zshrc = home.join(".zshrc");
    let line = format!("source \"{}\"", script.display());
    if fs::read_to_string(&zshrc)
        .map(|content| content.contains(&line))
        .unwrap_or(false)
    {
        return Ok(());
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&zshrc)?;
    writeln!(file)?;
    writeln!(file, "# papermind shell completions")?;
    writeln!(file, "{line}")?;
    Ok(())
}

pub fn run_completions_command(shell_arg: Option<&str>, install: bool) -> Result<(), AppError> {
    let shell = match shell_arg {
        Some(name) => shell_from_name(name)
            .ok_or_else(|| AppError::InvalidArgument(format!("unknown shell '{name}'")))?,
        None => detect_current_shell().ok_or_else(|| {
            AppError::InvalidArgument(
                "unable to detect shell from $SHELL; pass a shell name".to_string(),
            )
        })?,
    };

    if install {
        let home = crate::config::home_dir().ok_or_else(|| {
            AppError::InvalidArgument("HOME is not set; cannot install completions".to_string())
        })?;
        let path = install_completions(shell, &home)?;
        println!("completions installed to {}", path.display());
    } else {
        generate_completions(shell, &mut io::stdout().lock());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap_complete::Shell;

    use super::{generate_completions, install_completions, install_path, shell_from_name};

    #[test]
    fn shell_names_and_paths_are_recognised() {
        assert_eq!(shell_from_name("/bin/zsh"), Some(Shell::Zsh));
        assert_eq!(shell_from_name("BASH"), Some(Shell::Bash));
        assert_eq!(shell_from_name("/usr/bin/pwsh"), Some(Shell::PowerShell));
        assert_eq!(shell_from_name("/usr/bin/csh"), None);
    }

    #[test]
    fn unsupported_shells_have_no_install_path() {
        let home = PathBuf::from("/tmp/papermind-home");
        assert!(install_path(Shell::Elvish, &home).is_none());
        assert_eq!(
            install_path(Shell::Fish, &home),
            Some(home.join(".config/fish/completions/papermind.fish"))
        );
    }

    #[test]
    fn bash_script_names_every_subcommand() {
        let mut buf = Vec::new();
        generate_completions(Shell::Bash, &mut buf);
        let script = String::from_utf8(buf).expect("completions should be UTF-8");
        for name in ["papermind", "sync-notes", "configure", "status"] {
            assert!(script.contains(name), "bash completions should mention {name}");
        }
    }

    #[test]
    fn zsh_install_sources_script_once() {
        let home = std::env::temp_dir().join(format!(
            "papermind-completions-{}",
            uuid::Uuid::now_v7()
        ));
        std::fs::create_dir_all(&home).expect("home should be creatable");

        let path = install_completions(Shell::Zsh, &home).expect("zsh install should succeed");
        assert!(path.is_file());
        install_completions(Shell::Zsh, &home).expect("second install should succeed");
        let zshrc = std::fs::read_to_string(home.join(".zshrc")).expect(".zshrc should exist");
        assert_eq!(zshrc.matches("source").count(), 1);

        assert!(install_completions(Shell::Elvish, &home).is_err());
        let _ = std::fs::remove_dir_all(home);
    }
}
