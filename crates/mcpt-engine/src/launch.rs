//! How a server command is actually launched on each platform.
//!
//! Package runners such as `npx` are `.cmd` shims on Windows and only
//! resolve through the shell, so every Windows launch goes through
//! `cmd /C`. Elsewhere the executable is started directly.

/// Commands that are installed as `.cmd` shims on Windows.
const CMD_SHIMS: &[&str] = &["npx", "npm", "yarn", "pnpm"];

/// Platform family, as far as launching is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Windows,
    Unix,
}

impl PlatformFamily {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    fn uses_shell(self) -> bool {
        matches!(self, Self::Windows)
    }
}

/// The program and argument vector handed to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub shell: bool,
}

impl LaunchPlan {
    /// Resolve `command` and `args` for `platform`.
    pub fn resolve(command: &str, args: &[String], platform: PlatformFamily) -> Self {
        if !platform.uses_shell() {
            return Self {
                program: command.to_string(),
                args: args.to_vec(),
                shell: false,
            };
        }

        let resolved = if CMD_SHIMS.contains(&command.to_ascii_lowercase().as_str()) {
            format!("{command}.cmd")
        } else {
            command.to_string()
        };

        let mut shell_args = vec!["/C".to_string(), resolved];
        shell_args.extend(args.iter().map(|a| quote_for_shell(a)));
        Self {
            program: "cmd".to_string(),
            args: shell_args,
            shell: true,
        }
    }
}

/// Wrap an argument containing whitespace in double quotes so the shell
/// keeps it as one word. Already-quoted arguments are left alone.
fn quote_for_shell(arg: &str) -> String {
    if arg.contains(char::is_whitespace) && !arg.starts_with('"') {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}
