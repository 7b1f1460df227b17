//! Peripheral commands
//!
//! Each command runs one operation over a connected board and prints the
//! result.

use boardlink_core::protocol::{Level, LineEnding, PinMode, Value};
use boardlink_link::Board;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

pub async fn cmd_pin_mode(board: &Board, pin: &str, mode: PinMode) -> CmdResult {
    board.set_pin_mode(pin, mode).await?;
    println!("{}: {:?}", pin, mode);
    Ok(())
}

pub async fn cmd_pin_write(board: &Board, pin: &str, level: Level) -> CmdResult {
    board.set_digital_output(pin, level).await?;
    println!("{}: {:?}", pin, level);
    Ok(())
}

pub async fn cmd_pwm(board: &Board, pin: &str, duty: i64) -> CmdResult {
    board.set_pwm_output(pin, duty).await?;
    println!("{}: PWM {}", pin, duty);
    Ok(())
}

pub async fn cmd_servo(board: &Board, pin: &str, angle: i64) -> CmdResult {
    board.set_servo_output(pin, angle).await?;
    println!("{}: {} degrees", pin, angle);
    Ok(())
}

pub async fn cmd_pin_read(board: &Board, pin: &str) -> CmdResult {
    let high = board.read_digital_pin(pin).await?;
    println!("{}: {}", pin, Value::Bool(high));
    Ok(())
}

pub async fn cmd_analog_read(board: &Board, pin: &str) -> CmdResult {
    let value = board.read_analog_pin(pin).await?;
    println!("{}: {} / {}", pin, value, board.profile().adc_max());
    Ok(())
}

pub async fn cmd_memory_read(board: &Board, address: i64) -> CmdResult {
    let value = board.memory_read(address).await?;
    println!("0x{:04X}: 0x{:02X} ({})", address, value, value);
    Ok(())
}

pub async fn cmd_memory_write(board: &Board, address: i64, value: i64) -> CmdResult {
    board.memory_write(address, value).await?;
    println!("0x{:04X} <- {}", address, value);
    Ok(())
}

pub async fn cmd_serial_print(board: &Board, text: &str, newline: bool) -> CmdResult {
    let eol = if newline {
        LineEnding::Newline
    } else {
        LineEnding::None
    };
    board.serial_print(text, eol).await?;
    log::info!("Printed {} byte(s)", text.len());
    Ok(())
}

pub async fn cmd_serial_available(board: &Board) -> CmdResult {
    println!("{}", board.serial_available().await?);
    Ok(())
}

pub async fn cmd_serial_read(board: &Board) -> CmdResult {
    print!("{}", board.serial_read().await?);
    Ok(())
}

pub async fn cmd_extension(board: &Board, name: &str, args: &[String]) -> CmdResult {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let value = board.call_extension(name, &args).await?;
    println!("{}: {}", name, value);
    Ok(())
}
