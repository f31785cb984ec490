//! Minimal slave demo: serves a fixed holding-register table at a configured
//! address. Mirrors the upstream project's own sample slave utility. Not
//! part of the published library API.

use std::sync::{Arc, Mutex};

use modbus_rtu::conn::Role;
use modbus_rtu::event_loop::config_for;
use modbus_rtu::{EventLoop, Primitive};

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let device = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(9600);
    let address: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(1);

    let holding_registers: Vec<u16> = vec![0x007B, 0x1234, 0x0000, 0x0042];

    let mut config = config_for(Role::Slave, device.clone(), baud);
    config.address = address;

    // The callback runs synchronously from inside RECV_PRIM (the slave
    // FSM's reentrancy property): it only stashes the answer here, the
    // actual `submit_prim` happens from the main loop below.
    let pending_response = Arc::new(Mutex::new(None));
    let pending_clone = pending_response.clone();
    let on_request = move |p: Primitive| {
        if let Primitive::ReadHoldingRegistersRequest { address, body } = p {
            let start = body.first_reg as usize;
            let end = (start + body.num_reg as usize).min(holding_registers.len());
            let slice = holding_registers.get(start..end).unwrap_or(&[]).to_vec();
            *pending_clone.lock().unwrap() =
                Some(Primitive::read_holding_registers_response(address, slice));
        }
    };

    let mut event_loop = EventLoop::new();
    let fd = event_loop
        .add_slave(config, Some(Box::new(on_request)))
        .unwrap_or_else(|e| {
            eprintln!("failed to open {device}: {e}");
            std::process::exit(1);
        });

    loop {
        event_loop.tick().expect("event loop tick");
        if let Some(response) = pending_response.lock().unwrap().take() {
            event_loop.submit_prim(fd, response).expect("submit response");
        }
    }
}
