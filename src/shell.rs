//! Running recipe lines and writing to the console
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

/// A command line to hand to the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// The fully expanded command text
    pub line: String,
    /// The directory the command runs in
    pub directory: PathBuf,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
}

impl ShellCommand {
    /// Create a command with no extra environment
    pub fn new(line: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        ShellCommand {
            line: line.into(),
            directory: directory.into(),
            env: Vec::new(),
        }
    }
}

/// Runs shell commands on behalf of recipes and `$(shell ...)`
pub trait CommandRunner: Send + Sync {
    /// Run `command`, inheriting stdout and stderr, and return its exit status
    fn run(&self, command: &ShellCommand) -> io::Result<i32>;

    /// Run `command` and return what it wrote to stdout
    fn capture(&self, command: &ShellCommand) -> io::Result<String>;
}

/// Runs commands through the host shell: `sh -c` or `cmd /C` on Windows
#[derive(Debug, Clone, Copy, Default)]
pub struct HostShell;

impl HostShell {
    fn command(&self, command: &ShellCommand) -> Command {
        let (shell, flag) = shell_invocation();
        let mut child = Command::new(shell);
        child
            .arg(flag)
            .arg(&command.line)
            .current_dir(&command.directory)
            .envs(command.env.iter().map(|(k, v)| (k, v)));
        log::debug!(
            "spawning {} {} {:?} in {}",
            shell,
            flag,
            command.line,
            command.directory.display()
        );
        child
    }
}

impl CommandRunner for HostShell {
    fn run(&self, command: &ShellCommand) -> io::Result<i32> {
        let status = self.command(command).status()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn capture(&self, command: &ShellCommand) -> io::Result<String> {
        let output = self
            .command(command)
            .stdin(Stdio::inherit())
            .stderr(Stdio::inherit())
            .output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(windows)]
fn shell_invocation() -> (&'static str, &'static str) {
    ("cmd", "/C")
}

#[cfg(not(windows))]
fn shell_invocation() -> (&'static str, &'static str) {
    ("sh", "-c")
}

/// Where echoed commands and `$(info ...)` output go
#[derive(Clone)]
pub struct Console {
    sink: Arc<Mutex<dyn Write + Send>>,
}

impl Console {
    /// A console writing to the process's stdout
    pub fn stdout() -> Self {
        Console::new(io::stdout())
    }

    /// A console writing to `sink`
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Console {
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// A console writing to a shared sink
    pub fn shared(sink: Arc<Mutex<dyn Write + Send>>) -> Self {
        Console { sink }
    }

    /// Write one line
    pub fn println(&self, line: &str) {
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
            log::debug!("unable to write to console: {}", e);
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Console::stdout()
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_console_writes_lines() {
        let (console, buffer) = captured_console();
        console.println("echo hi");
        console.clone().println("done");
        assert_eq!(output(&buffer), "echo hi\ndone\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_host_shell_status_and_capture() {
        let dir = tempfile::tempdir().unwrap();
        let shell = HostShell;
        assert_eq!(shell.run(&ShellCommand::new("exit 3", dir.path())).unwrap(), 3);

        let mut command = ShellCommand::new("echo $GREETING; pwd", dir.path());
        command.env.push(("GREETING".to_string(), "hello".to_string()));
        let output = shell.capture(&command).unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("hello"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(
            pwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
