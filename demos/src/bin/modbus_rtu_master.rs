//! Minimal master demo: opens a device, reads one holding register, prints
//! the result. Mirrors the upstream project's own sample master utility.
//! Not part of the published library API.

use std::sync::mpsc;

use modbus_rtu::conn::Role;
use modbus_rtu::event_loop::config_for;
use modbus_rtu::{EventLoop, Primitive};

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let device = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud: u32 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9600);
    let slave_address: u16 = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);

    let (tx, rx) = mpsc::channel();
    let config = config_for(Role::Master, device.clone(), baud);

    let mut event_loop = EventLoop::new();
    let fd = event_loop
        .add_master(config, Some(Box::new(move |p| tx.send(p).ok().unwrap_or(()))))
        .unwrap_or_else(|e| {
            eprintln!("failed to open {device}: {e}");
            std::process::exit(1);
        });

    event_loop
        .submit_prim(
            fd,
            Primitive::read_holding_registers_request(slave_address, 0x0000, 1),
        )
        .expect("submit");

    loop {
        event_loop.tick().expect("event loop tick");
        if let Ok(prim) = rx.try_recv() {
            match prim {
                Primitive::ReadHoldingRegistersResponse { body, .. } => {
                    println!("register[0] = {:#06x}", body.registers[0]);
                }
                Primitive::ResponseTimeout { address } => {
                    println!("no response from address {address}");
                }
                _ => {}
            }
            break;
        }
    }
}
