use clap::error::ErrorKind;
use clap::Parser;
use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;
use tracing::{debug, info};

mod args;
mod packet;
mod sender;

use args::{EventArgs, SERVER_ADDRESS};
use packet::Packet;
use sender::ServerAddress;

#[derive(Parser, Debug)]
#[command(name = "generic-tcp-event")]
#[command(about = "Create an event and send it as a Nimbus Generic TCP packet")]
#[command(version = "1.0.0")]
#[command(after_help = USAGE)]
struct Cli {
    /// Verbose logging to stderr (default: false)
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Event arguments as name/value pairs, e.g. ServerAddress 10.0.0.1 Status 1 T0 TAG
    #[arg(allow_hyphen_values = true, trailing_var_arg = true, value_name = "NAME VALUE")]
    pairs: Vec<OsString>,
}

const USAGE: &str = "\
generic-tcp-event will create an event and transfer it as a Nimbus Generic TCP packet to the Nimbus Server.
Ensure you have configured SCADA Import 'Generic TCP (Server)'.
No check is done to see whether Nimbus Server is running or not.

Usage:

generic-tcp-event ServerAddress xxx.xxx.xxx.xxx[:ppppp] Status n [Date yyyy-mm-dd] [Time hh:mm:ss] [T0 xxx] [T1 xxx] [T2 xxx] [T3 xxx] [T4 xxx] [T5 xxx]

Where:

xxx.xxx.xxx.xxx is the Nimbus Server IP v4 address (or DNS name)
ppppp is the port number (defaults to 15000), ensure the port is allowed through any firewall
n is 0 = Inactive, 1 = Active, 2 = Acked, 3 = Send text message
For Alarms (n = 0..2): T0 = Tag, T1 = Area, T2 = Category, T3 = Name, T4 = Description, T5 = State
For Text Message (n = 3): T3 = Name of receiver, T4 = Text to send
Texts containing space must be wrapped in quotes (\")

Examples:
generic-tcp-event serveraddress nimbus.myorg.se status 1 t0 TA0220GT81 t4 \"Freeze protection TA0220\"
generic-tcp-event serveraddress 127.0.0.1:15000 status 3 t3 \"nisse hult (SMS)\" t4 \"Time to have some food\"
";

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ReturnCode {
    SentOk = 0,
    ArgumentFailed = 1,
    CouldNotConnect = 2,
}

impl From<ReturnCode> for ExitCode {
    fn from(code: ReturnCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Write a line to stdout, ignoring failures such as a closed pipe
fn console(out: &mut impl Write, text: &str) {
    let _ = writeln!(out, "{}", text);
}

/// Parse the command line. Every clap outcome that stops the run, help and version
/// included, counts as an argument failure.
fn parse_cli<I, T>(argv: I, out: &mut impl Write) -> Result<Cli, ReturnCode>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(argv).map_err(|e| {
        match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => console(out, e.to_string().trim_end()),
            _ => {
                debug!("Command line rejected: {}", e);
                console(out, USAGE);
            }
        }
        ReturnCode::ArgumentFailed
    })
}

/// Arguments that are not valid Unicode are decoded lossily rather than rejected
fn event_tokens(pairs: &[OsString]) -> Vec<String> {
    pairs.iter().map(|p| p.to_string_lossy().into_owned()).collect()
}

fn run(pairs: Vec<String>, out: &mut impl Write) -> ReturnCode {
    let args = EventArgs::from_pairs(pairs);
    debug!("Parsed {} event arguments", args.len());

    if let Err(e) = args.validate() {
        debug!("{}", e);
        console(out, USAGE);
        return ReturnCode::ArgumentFailed;
    }

    let server = ServerAddress::parse(args.get_or_empty(SERVER_ADDRESS));
    let packet = Packet::from_args(&args);
    info!("Sending event to {}", server);

    match sender::send_packet(&server, &packet) {
        Ok(()) => {
            console(out, &format!("Sent event to Nimbus: {}", packet));
            ReturnCode::SentOk
        }
        Err(e) => {
            console(out, &format!("Failed to write packet to Nimbus, error: {:#}", e));
            ReturnCode::CouldNotConnect
        }
    }
}

fn main() -> ExitCode {
    let cli = match parse_cli(std::env::args_os(), &mut io::stdout().lock()) {
        Ok(cli) => cli,
        Err(code) => return code.into(),
    };

    // Keep stdout for the console messages
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(io::stderr)
        .init();

    let code = run(event_tokens(&cli.pairs), &mut io::stdout().lock());
    debug!("Exiting with {:?}", code);
    code.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Sink that fails every write, like a closed stdout
    struct ClosedOutput;

    impl Write for ClosedOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_missing_required_prints_usage() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let mut out = Vec::new();
        let code = run(tokens(&["ServerAddress", &address, "T0", "x"]), &mut out);

        assert_eq!(code, ReturnCode::ArgumentFailed);
        assert!(String::from_utf8(out).unwrap().contains("Usage:"));
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let code = run(tokens(&["Status", "1"]), &mut Vec::new());
        assert_eq!(code, ReturnCode::ArgumentFailed);
    }

    #[test]
    fn test_sends_alarm_event() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            conn.read_to_end(&mut received).unwrap();
            received
        });

        let address = format!("127.0.0.1:{}", port);
        let mut out = Vec::new();
        let code = run(
            tokens(&["ServerAddress", &address, "Status", "1", "T0", "TA01", "T4", "Freeze protection"]),
            &mut out,
        );

        assert_eq!(code, ReturnCode::SentOk);
        assert_eq!(reader.join().unwrap(), b"1|||TA01||||Freeze protection|\n".to_vec());
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Sent event to Nimbus: 1|||TA01||||Freeze protection|\n"
        );
    }

    #[test]
    fn test_unreachable_server() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let address = format!("127.0.0.1:{}", port);

        let mut out = Vec::new();
        let code = run(
            tokens(&["ServerAddress", &address, "Status", "3", "T3", "nisse", "T4", "food"]),
            &mut out,
        );

        assert_eq!(code, ReturnCode::CouldNotConnect);
        assert!(String::from_utf8(out).unwrap().starts_with("Failed to write packet to Nimbus, error: "));
    }

    #[test]
    fn test_closed_console_is_ignored() {
        let code = run(tokens(&["Status", "1"]), &mut ClosedOutput);
        assert_eq!(code, ReturnCode::ArgumentFailed);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ReturnCode::SentOk as u8, 0);
        assert_eq!(ReturnCode::ArgumentFailed as u8, 1);
        assert_eq!(ReturnCode::CouldNotConnect as u8, 2);
    }

    #[test]
    fn test_cli_collects_pairs() {
        let argv = ["generic-tcp-event", "-v", "ServerAddress", "h", "Status", "-1"];
        let cli = parse_cli(argv, &mut Vec::new()).unwrap();

        assert!(cli.verbose);
        assert_eq!(event_tokens(&cli.pairs), tokens(&["ServerAddress", "h", "Status", "-1"]));
    }

    #[test]
    fn test_help_and_version_are_argument_failures() {
        let mut out = Vec::new();
        let code = parse_cli(["generic-tcp-event", "-h"], &mut out).unwrap_err();
        assert_eq!(code, ReturnCode::ArgumentFailed);
        assert!(String::from_utf8(out).unwrap().contains("Usage:"));

        let mut out = Vec::new();
        let code = parse_cli(["generic-tcp-event", "--version"], &mut out).unwrap_err();
        assert_eq!(code, ReturnCode::ArgumentFailed);
        assert!(String::from_utf8(out).unwrap().contains("1.0.0"));
    }

    #[test]
    fn test_rejected_command_line_is_argument_failure() {
        let argv = ["generic-tcp-event", "-v", "-v", "ServerAddress", "h", "Status", "1"];
        let mut out = Vec::new();

        let code = parse_cli(argv, &mut out).unwrap_err();

        assert_eq!(code, ReturnCode::ArgumentFailed);
        assert!(String::from_utf8(out).unwrap().contains("Usage:"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_argument_is_sent_as_latin1() {
        use std::os::unix::ffi::OsStringExt;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let reader = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut received = Vec::new();
            conn.read_to_end(&mut received).unwrap();
            received
        });

        let argv: Vec<OsString> = vec![
            "generic-tcp-event".into(),
            "ServerAddress".into(),
            address.into(),
            "Status".into(),
            "1".into(),
            "T4".into(),
            OsString::from_vec(b"Frysskydd \xe5".to_vec()),
        ];
        let cli = parse_cli(argv, &mut Vec::new()).unwrap();
        let code = run(event_tokens(&cli.pairs), &mut Vec::new());

        assert_eq!(code, ReturnCode::SentOk);
        assert_eq!(reader.join().unwrap(), b"1|||||||Frysskydd ?|\n".to_vec());
    }
}
