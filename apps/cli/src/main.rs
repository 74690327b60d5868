use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use fx_core::capture::SessionReconstructor;
use fx_core::disasm::Disassembler;
use fx_core::program::{
    ProgramHeader, strip_end_sentinel, words_from_hex_text, words_from_le_bytes,
};
use fx_core::protocol::frame::hex_dump;
use fx_core::session::{AckStatus, PlcSession, SessionConfig};
use fx_core::transport::{MockTransport, SerialPortTransport, SerialTransport, list_ports};
use tracing::{debug, error, info, warn};

mod wireshark;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mitsubishi FX programming-port tool", long_about = None)]
struct Cli {
    /// Serial device (e.g. /dev/ttyUSB0, COM3)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// TOML session config; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print requests instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Device memory ("0"/"1" commands)
    #[command(subcommand)]
    Mem(AreaCommand),
    /// Parameter area (E00/E10)
    #[command(subcommand)]
    Param(AreaCommand),
    /// Program flash (E01/E11, lock)
    #[command(subcommand)]
    Flash(FlashCommand),
    /// Single bit operations (E7/E8)
    #[command(subcommand)]
    Bit(BitCommand),
    /// PLC identification
    #[command(subcommand)]
    Plc(PlcCommand),
    /// Program header and body
    #[command(subcommand)]
    Program(ProgramCommand),
    /// Passive capture analysis
    #[command(subcommand)]
    Capture(CaptureCommand),
    /// List serial ports
    Ports,
}

#[derive(Args, Debug)]
struct ReadArgs {
    /// Start address (decimal or 0x hex)
    #[arg(value_parser = parse_u16)]
    address: u16,

    /// Number of words
    #[arg(short, long, default_value_t = 1, value_parser = parse_u8)]
    words: u8,
}

#[derive(Args, Debug)]
struct WriteArgs {
    /// Start address (decimal or 0x hex)
    #[arg(value_parser = parse_u16)]
    address: u16,

    /// Word values (decimal or 0x hex)
    #[arg(required = true, value_parser = parse_u16)]
    values: Vec<u16>,
}

#[derive(Subcommand, Debug)]
enum AreaCommand {
    Read(ReadArgs),
    Write(WriteArgs),
}

#[derive(Subcommand, Debug)]
enum FlashCommand {
    Read(ReadArgs),
    Write(WriteArgs),
    /// Lock flash after writing
    Lock,
}

#[derive(Subcommand, Debug)]
enum BitCommand {
    Set {
        #[arg(value_parser = parse_u16)]
        address: u16,
    },
    Clear {
        #[arg(value_parser = parse_u16)]
        address: u16,
    },
}

#[derive(Subcommand, Debug)]
enum PlcCommand {
    /// Query the PLC type code
    Type,
    /// Query the firmware version code
    Version,
}

#[derive(Args, Debug)]
struct WordInput {
    /// Input file (stdin when omitted)
    file: Option<PathBuf>,

    /// Input is little-endian binary instead of hex words
    #[arg(long)]
    binary: bool,
}

#[derive(Subcommand, Debug)]
enum ProgramCommand {
    /// Read and print the 46-word header
    Header,
    /// Read the program body
    Read {
        /// Disassemble instead of printing raw words
        #[arg(long)]
        decode: bool,
    },
    /// Write a program body
    Write(WordInput),
    /// Disassemble program words
    Disassemble(WordInput),
}

#[derive(Subcommand, Debug)]
enum CaptureCommand {
    /// Reconstruct messages from a Wireshark JSON export, one JSON line each
    Parse { file: PathBuf },
}

fn parse_number(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", text, e))
}

fn parse_u16(text: &str) -> Result<u16, String> {
    let value = parse_number(text)?;
    u16::try_from(value).map_err(|_| format!("{} does not fit in 16 bits", text))
}

fn parse_u8(text: &str) -> Result<u8, String> {
    let value = parse_number(text)?;
    u8::try_from(value).map_err(|_| format!("{} does not fit in 8 bits", text))
}

type Session = PlcSession<Box<dyn SerialTransport>>;

fn session_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.baud_rate = baud;
    }
    config.dry_run |= cli.dry_run;
    Ok(config)
}

fn open_session(config: SessionConfig) -> Result<Session> {
    let transport: Box<dyn SerialTransport> = if config.dry_run {
        Box::new(MockTransport::new())
    } else {
        let Some(port) = config.port.as_deref() else {
            bail!("No serial port given (use --port or the config file)");
        };
        Box::new(SerialPortTransport::open_with(
            port,
            config.baud_rate,
            config.line,
        )?)
    };
    Ok(PlcSession::new(transport, config))
}

fn print_dry_run(session: &Session) {
    if let Some(frame) = session.last_request() {
        println!("{}", hex_dump(frame));
    }
}

fn print_words(address: u16, words: &[u16]) {
    for (i, word) in words.iter().enumerate() {
        let at = address.wrapping_add((i * 2) as u16);
        println!("0x{:04X}: 0x{:04X} ({})", at, word, word);
    }
}

fn report_ack(session: &Session, what: &str, status: AckStatus) -> Result<()> {
    match status {
        AckStatus::Acked => {
            info!("{}: ACK", what);
            Ok(())
        }
        AckStatus::DryRun => {
            print_dry_run(session);
            Ok(())
        }
        other => bail!("{}: {}", what, other),
    }
}

fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    match file {
        Some(path) => {
            data = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
        }
        None => {
            std::io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read stdin")?;
        }
    }
    Ok(data)
}

fn read_program_words(input: &WordInput) -> Result<Vec<u16>> {
    let data = read_input(input.file.as_deref())?;
    let words = if input.binary {
        words_from_le_bytes(&data)?
    } else {
        let text = String::from_utf8(data).context("Hex input is not UTF-8")?;
        words_from_hex_text(&text)?
    };
    debug!(words = words.len(), "Program input loaded");
    Ok(words)
}

fn print_disassembly(words: &[u16]) {
    for instr in Disassembler::new(words) {
        if let Some(issue) = &instr.issue {
            debug!(words = %instr.words_hex(), "{}", issue);
        }
        println!("{}\t{}", instr.words_hex(), instr);
    }
}

fn disassemble_input(input: &WordInput) -> Result<()> {
    let mut words = read_program_words(input)?;
    strip_end_sentinel(&mut words);
    print_disassembly(&words);
    Ok(())
}

fn print_header(header: &ProgramHeader) {
    println!("PLC model code:        0x{:04X}", header.model);
    println!("Program title:         {}", header.title);
    println!("Program capacity:      {} steps", header.capacity);
    println!("File system info:      {:04X?}", header.fs_info);
    println!(
        "Password:              {}",
        if header.password_set { "set" } else { "none" }
    );
    println!("File registers (D8000): {}", header.file_register_capacity());
    let (m_start, m_end) = header.latch_relays();
    println!("Latched relays:        M{}-M{}", m_start, m_end);
    let (d_start, d_end) = header.latch_data_registers();
    println!("Latched registers:     D{}-D{}", d_start, d_end);
}

#[derive(Debug, Clone, Copy)]
enum Area {
    Memory,
    Params,
}

fn run_area(session: &mut Session, area: Area, command: AreaCommand) -> Result<()> {
    match command {
        AreaCommand::Read(args) => {
            let words = match area {
                Area::Params => session.read_params(args.address, args.words)?,
                Area::Memory => session.read_memory(args.address, args.words)?,
            };
            if session.is_dry_run() {
                print_dry_run(session);
            } else {
                print_words(args.address, &words);
            }
        }
        AreaCommand::Write(args) => {
            let (what, status) = match area {
                Area::Params => ("param write", session.write_params(args.address, &args.values)?),
                Area::Memory => ("mem write", session.write_memory(args.address, &args.values)?),
            };
            report_ack(session, what, status)?;
        }
    }
    Ok(())
}

fn run_flash(session: &mut Session, command: FlashCommand) -> Result<()> {
    match command {
        FlashCommand::Read(args) => {
            let words = session.read_flash(args.address, args.words)?;
            if session.is_dry_run() {
                print_dry_run(session);
            } else {
                print_words(args.address, &words);
            }
        }
        FlashCommand::Write(args) => {
            let status = session.write_flash(args.address, &args.values)?;
            report_ack(session, "flash write", status)?;
        }
        FlashCommand::Lock => {
            let status = session.lock_flash()?;
            report_ack(session, "flash lock", status)?;
        }
    }
    Ok(())
}

fn run_program(session: &mut Session, command: ProgramCommand) -> Result<()> {
    match command {
        ProgramCommand::Header => {
            if session.is_dry_run() {
                // Nothing comes back to parse
                session.read_flash(0, fx_core::protocol::PROGRAM_HEADER_WORDS)?;
                print_dry_run(session);
                return Ok(());
            }
            let header = session.read_program_header()?;
            print_header(&header);
        }
        ProgramCommand::Read { decode } => {
            let words = session.read_program_body()?;
            if session.is_dry_run() {
                print_dry_run(session);
            } else if decode {
                print_disassembly(&words);
            } else {
                for word in &words {
                    println!("{:04X}", word);
                }
            }
        }
        ProgramCommand::Write(input) => {
            let mut words = read_program_words(&input)?;
            if words.is_empty() {
                bail!("No program words given");
            }
            if strip_end_sentinel(&mut words) {
                warn!("Trailing end-of-program words dropped from input");
            }
            session.write_program_body(&words)?;
            if session.is_dry_run() {
                print_dry_run(session);
            } else {
                info!(words = words.len(), "Program body written");
            }
        }
        ProgramCommand::Disassemble(input) => disassemble_input(&input)?,
    }
    Ok(())
}

fn run_capture(command: CaptureCommand) -> Result<()> {
    let CaptureCommand::Parse { file } = command;
    let records = wireshark::load_capture(&file)?;

    let mut reconstructor = SessionReconstructor::new();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut emitted = 0usize;
    for record in &records {
        for message in reconstructor.feed(record) {
            writeln!(out, "{}", serde_json::to_string(&message)?)?;
            emitted += 1;
        }
    }
    for message in reconstructor.finish() {
        writeln!(out, "{}", serde_json::to_string(&message)?)?;
        emitted += 1;
    }

    info!(chunks = records.len(), messages = emitted, "Capture reconstructed");
    Ok(())
}

fn run_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        info!("No serial ports found");
    }
    for port in ports {
        println!("{}\t{}", port.name, port.description);
    }
    Ok(())
}

fn run_bit(session: &mut Session, command: BitCommand) -> Result<()> {
    let (what, status) = match command {
        BitCommand::Set { address } => (
            format!("bit set 0x{:04X}", address),
            session.set_bit(address)?,
        ),
        BitCommand::Clear { address } => (
            format!("bit clear 0x{:04X}", address),
            session.clear_bit(address)?,
        ),
    };
    report_ack(session, &what, status)
}

fn run_plc(session: &mut Session, command: PlcCommand) -> Result<()> {
    let (label, code) = match command {
        PlcCommand::Type => ("PLC type", session.query_type()?),
        PlcCommand::Version => ("PLC version", session.query_version()?),
    };
    match code {
        Some(code) => println!("{}: 0x{:04X}", label, code),
        None => print_dry_run(session),
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = session_config(&cli)?;

    match cli.command {
        Command::Ports => run_ports(),
        Command::Capture(command) => run_capture(command),
        Command::Program(ProgramCommand::Disassemble(input)) => disassemble_input(&input),
        Command::Mem(command) => run_area(&mut open_session(config)?, Area::Memory, command),
        Command::Param(command) => run_area(&mut open_session(config)?, Area::Params, command),
        Command::Flash(command) => run_flash(&mut open_session(config)?, command),
        Command::Bit(command) => run_bit(&mut open_session(config)?, command),
        Command::Plc(command) => run_plc(&mut open_session(config)?, command),
        Command::Program(command) => run_program(&mut open_session(config)?, command),
    }
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u16("4096"), Ok(4096));
        assert_eq!(parse_u16("0x1000"), Ok(0x1000));
        assert_eq!(parse_u16("0XFFFF"), Ok(0xFFFF));
        assert!(parse_u16("0x10000").is_err());
        assert!(parse_u16("abc").is_err());
        assert_eq!(parse_u8("0x40"), Ok(64));
        assert!(parse_u8("256").is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "fx", "--port", "COM3", "--baud", "9600", "--dry-run", "ports",
        ]);
        let config = session_config(&cli).unwrap();
        assert_eq!(config.port.as_deref(), Some("COM3"));
        assert_eq!(config.baud_rate, 9600);
        assert!(config.dry_run);
    }

    #[test]
    fn test_cli_subcommands_parse() {
        let cli = Cli::parse_from(["fx", "mem", "read", "0x1000", "--words", "4"]);
        match cli.command {
            Command::Mem(AreaCommand::Read(args)) => {
                assert_eq!(args.address, 0x1000);
                assert_eq!(args.words, 4);
            }
            other => panic!("unexpected {:?}", other),
        }

        let cli = Cli::parse_from(["fx", "flash", "write", "0x805C", "0x000F", "1"]);
        match cli.command {
            Command::Flash(FlashCommand::Write(args)) => {
                assert_eq!(args.values, vec![0x000F, 1]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dry_run_session_sends_nothing() {
        let config = SessionConfig {
            dry_run: true,
            ..SessionConfig::default()
        };
        let mut session = open_session(config).unwrap();
        let status = session.set_bit(0x0500).unwrap();
        assert_eq!(status, AckStatus::DryRun);
        assert!(session.last_request().is_some());
    }
}
