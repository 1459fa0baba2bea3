//! CPU6 Emulator - CLI Entry Point
//!
//! Commands:
//! - `cpu6-emu run` - Build the machine from a config and run it
//! - `cpu6-emu disasm <image>` - Disassemble a ROM or memory image
//! - `cpu6-emu config` - Print the default machine config as JSON
//! - `cpu6-emu test` - Run the built-in self-test

use clap::{Parser, Subcommand};
use std::io::Write;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cpu6-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "An emulator of the Centurion CPU6 16-bit minicomputer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the machine until it halts
    Run {
        /// Machine config (JSON); the reference machine when omitted
        #[arg(short, long)]
        config: Option<String>,
        /// Maximum number of instructions to run
        #[arg(short, long, default_value = "1000000")]
        max_steps: u64,
        /// Log every instruction
        #[arg(short, long)]
        trace: bool,
        /// Text typed into the console port before starting
        #[arg(short, long)]
        input: Option<String>,
        /// Write the final CPU state as JSON to this file
        #[arg(long)]
        dump_state: Option<String>,
    },
    /// Disassemble a binary image
    Disasm {
        /// Path to the image
        image: String,
        /// Logical address of the first byte (hex)
        #[arg(short, long, default_value = "FC00")]
        origin: String,
    },
    /// Print the default machine config
    Config,
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    let trace = matches!(cli.command, Some(Commands::Run { trace: true, .. }));
    init_logging(trace);

    match cli.command {
        Some(Commands::Run { config, max_steps, input, dump_state, .. }) => {
            run_machine(config.as_deref(), max_steps, input.as_deref(), dump_state.as_deref());
        }
        Some(Commands::Disasm { image, origin }) => {
            disassemble_file(&image, &origin);
        }
        Some(Commands::Config) => {
            print_default_config();
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("CPU6 Emulator v0.1.0");
            println!("A Centurion minicomputer emulator");
            println!();
            println!("Use --help for available commands");
        }
    }
}

/// `RUST_LOG` wins unless `--trace` asks for instruction-level output.
fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("cpu6=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cpu6=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_machine(config_path: Option<&str>, max_steps: u64, input: Option<&str>, dump_state: Option<&str>) {
    use cpu6::{Machine, MachineConfig};

    let config = match config_path {
        Some(path) => {
            println!("📂 Config: {}", path);
            match MachineConfig::from_json_file(path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("❌ {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => MachineConfig::default(),
    };

    let mut machine = match Machine::from_config(&config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("❌ Failed to build machine: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(text) = input {
        // the console expects carriage returns
        let bytes: Vec<u8> = text.replace("\\n", "\r").into_bytes();
        if !machine.send_input(&bytes) {
            eprintln!("⚠️  No mux card configured; input ignored");
        }
    }

    println!("━━━ Execution ━━━");

    let stdout = std::io::stdout();
    let result = machine.run(max_steps, |bytes| {
        let mut out = stdout.lock();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    });

    println!();
    println!("━━━ Result ━━━");
    let summary = match result {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ {}", e);
            dump_snapshot(&machine, dump_state);
            std::process::exit(1);
        }
    };

    let cpu = &machine.cpu;
    println!("Instructions: {}", summary.steps);
    println!("State: {:?}", cpu.state());
    println!("PC: {:04X}  IPL: {}  Flags: {}  MMU bank: {}",
        cpu.status.pc, cpu.status.ipl, cpu.status.flags, cpu.mmu_bank());
    for reg in cpu6::Reg::ALL {
        print!("{}={:04X} ", reg.name(), cpu.reg(reg));
    }
    println!();
    if let Some(diag) = machine.diag() {
        println!("Hex display: {}", diag.borrow());
    }

    dump_snapshot(&machine, dump_state);

    if !summary.halted {
        println!();
        println!("⚠️  Reached max steps limit ({}). Use --max-steps to increase.", max_steps);
    }
}

fn dump_snapshot(machine: &cpu6::Machine, path: Option<&str>) {
    let Some(path) = path else { return };

    let json = match serde_json::to_string_pretty(&machine.cpu.snapshot()) {
        Ok(j) => j,
        Err(e) => {
            eprintln!("❌ Failed to serialize state: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::write(path, json) {
        eprintln!("❌ Failed to write {}: {}", path, e);
        std::process::exit(1);
    }
    println!("✓ State written to {}", path);
}

fn disassemble_file(path: &str, origin: &str) {
    use cpu6::disassemble;

    let origin = match parse_hex(origin) {
        Some(o) => o,
        None => {
            eprintln!("❌ Invalid origin: {}", origin);
            std::process::exit(1);
        }
    };

    println!("📖 Disassembling: {}", path);
    println!();

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(&bytes, origin));
}

/// Accepts `FC00`, `0xFC00` and `$FC00`.
fn parse_hex(text: &str) -> Option<u16> {
    let digits = text
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .trim_start_matches('$');
    u16::from_str_radix(digits, 16).ok()
}

fn print_default_config() {
    match cpu6::MachineConfig::default().to_json_pretty() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
}

fn run_self_test() {
    use cpu6::config::{MuxConfig, RamConfig};
    use cpu6::cpu::alu::{self, FaultRule, Width};
    use cpu6::{disassemble_one, Cpu, Flags, Machine, MachineConfig, Ram, Reg};
    use cpu6::AddressSpace;

    println!("━━━ CPU6 Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    // Test 1: Word add carries into LINK
    print!("Word add carry... ");
    let (sum, flags) = alu::add(Width::Word, 0xFFFF, 0x0001);
    if sum == 0 && flags == Flags::VALUE | Flags::LINK {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {:04X} {})", sum, flags);
        failed += 1;
    }

    // Test 2: Byte subtract sign
    print!("Byte subtract sign... ");
    let (diff, flags) = alu::subtract(Width::Byte, 0x05, 0x07, FaultRule::NonPositive);
    if diff == 0xFE && flags.minus() && !flags.link() {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {:02X} {})", diff, flags);
        failed += 1;
    }

    // Test 3: Reset vector translation
    print!("Reset vector translation... ");
    let cpu = Cpu::new();
    if cpu.translate(cpu.status.pc) == 0x3FC00 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {:05X})", cpu.translate(cpu.status.pc));
        failed += 1;
    }

    // Test 4: CPU halt instruction
    print!("CPU halt instruction... ");
    let mut mem = AddressSpace::new();
    let ok = mem.register("ram", 0, 0x40000, Ram::new(0x40000)).is_ok();
    let mut cpu = Cpu::with_memory(mem);
    cpu.load(0xFC00, &[0x00]);
    if ok && cpu.step() == Ok(false) && cpu.is_halted() && cpu.opcount == 1 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 5: Interrupt entry and return
    print!("Interrupt round trip... ");
    cpu.reset();
    cpu.status.interrupt_enable = true;
    cpu.regs.set(3, Reg::P, 0x2000);
    cpu.load(0x2000, &[0x0A]);
    let entered = cpu.trigger_interrupt(3);
    let returned = cpu.step().is_ok() && cpu.status.ipl == 0 && cpu.status.pc == 0xFC00;
    if entered && returned {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 6: Console output through the mux
    print!("Console output... ");
    let config = MachineConfig {
        ram: vec![
            RamConfig { start: 0x00000, size: 0x3F000, mirror: None },
            RamConfig { start: 0x3F800, size: 0x800, mirror: None },
        ],
        roms: Vec::new(),
        mux: Some(MuxConfig::default()),
        diag: None,
        ..MachineConfig::default()
    };
    let mut out = Vec::new();
    let ran = Machine::from_config(&config).map(|mut machine| {
        machine.cpu.load(0xFC00, &[0x80, b'O', 0xA1, 0xF2, 0x01, 0x80, b'K', 0xA1, 0xF2, 0x01, 0x00]);
        machine.run(100, |bytes| out.extend_from_slice(bytes))
    });
    if matches!(ran, Ok(Ok(_))) && out == b"OK" {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 7: Disassembler
    print!("Disassembler... ");
    let (text, len) = disassemble_one(&[0x95, 0x41], 0);
    if text == "LDA X+" && len == 2 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {:?})", text);
        failed += 1;
    }

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_prefixes() {
        assert_eq!(parse_hex("FC00"), Some(0xFC00));
        assert_eq!(parse_hex("0x100"), Some(0x100));
        assert_eq!(parse_hex("$8000"), Some(0x8000));
        assert_eq!(parse_hex("zz"), None);
    }
}
