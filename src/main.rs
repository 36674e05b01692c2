mod menu;

use blescan::device::filter_by_keyword;
use blescan::connection::await_scan;
use blescan::{Config, ConnectionCommand, ConnectionEvent, ConnectionManager, DiscoveredDevice};
use crossbeam_channel::{unbounded, Sender};
use menu::{MenuChoice, MENU};
use std::io::{self, BufRead, Write};

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load_or_default();

    // Status from the connection thread is printed as it arrives
    let (event_sender, event_receiver) = unbounded::<ConnectionEvent>();
    let (manager, commands) = ConnectionManager::new(config.clone(), event_sender);

    let worker = std::thread::spawn(move || {
        manager.run();
    });

    std::thread::spawn(move || {
        for event in event_receiver {
            // Scan results are printed by the menu loop itself
            if !matches!(event, ConnectionEvent::ScanCompleted(_)) {
                println!("{}", event);
            }
        }
    });

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut last_scan: Vec<DiscoveredDevice> = Vec::new();

    println!("{}", MENU);
    loop {
        let Some(input) = prompt(&mut lines, "Enter your choice:") else {
            break;
        };

        match MenuChoice::parse(&input) {
            Some(MenuChoice::Scan) => {
                if let Some(devices) = scan(&commands, &config) {
                    last_scan = devices;
                }
            }
            Some(MenuChoice::Connect) => connect(&commands, &last_scan, &mut lines),
            Some(MenuChoice::Disconnect) => {
                send(&commands, ConnectionCommand::Disconnect);
            }
            Some(MenuChoice::Exit) => break,
            None => {
                println!("Invalid choice. Please try again.");
                println!("{}", MENU);
            }
        }
    }

    // Closing the command channel lets the worker disconnect and exit
    drop(commands);
    if worker.join().is_err() {
        log::error!("Connection thread panicked");
    }
}

fn prompt<B: BufRead>(lines: &mut io::Lines<B>, message: &str) -> Option<String> {
    println!("{}", message);
    let _ = io::stdout().flush();
    match lines.next()? {
        Ok(line) => Some(line),
        Err(e) => {
            log::error!("Failed to read input: {}", e);
            None
        }
    }
}

/// Hand a command to the connection thread, reporting when it is gone
fn send(commands: &Sender<ConnectionCommand>, command: ConnectionCommand) -> bool {
    if commands.send(command).is_err() {
        println!("Connection thread is not running.");
        return false;
    }
    true
}

fn scan(commands: &Sender<ConnectionCommand>, config: &Config) -> Option<Vec<DiscoveredDevice>> {
    let window = config.scan_duration();
    println!("Scanning for devices for {} seconds...", window.as_secs());

    let (reply, progress) = unbounded();
    let requested = ConnectionCommand::Scan {
        window,
        reply: Some(reply),
    };
    if !send(commands, requested) {
        return None;
    }

    match await_scan(&progress, config.scan_queue_wait(), config.scan_wait(window)) {
        Ok(devices) => {
            println!("{}", ConnectionEvent::ScanCompleted(devices.clone()));
            Some(devices)
        }
        Err(e) => {
            println!("Scan failed: {}", e);
            None
        }
    }
}

fn connect<B: BufRead>(commands: &Sender<ConnectionCommand>, last_scan: &[DiscoveredDevice], lines: &mut io::Lines<B>) {
    if last_scan.is_empty() {
        println!("No devices known yet. Scan first.");
        return;
    }

    let Some(keyword) = prompt(lines, "Enter the keyword to search for in the device ID or name:") else {
        return;
    };

    let candidates = filter_by_keyword(last_scan, &keyword);
    if candidates.is_empty() {
        println!("No devices found matching the keyword.");
        return;
    }

    println!("Select a device to connect:");
    for (index, device) in candidates.iter().enumerate() {
        println!("{}. {} ({})", index + 1, device.name, device.id);
    }

    let Some(choice) = prompt(lines, "Enter a number:") else {
        return;
    };

    match menu::select(&candidates, &choice) {
        Some(device) => {
            println!("Connecting to {} ({})...", device.name, device.id);
            send(commands, ConnectionCommand::Connect(device.id.clone()));
        }
        None => println!("Invalid choice."),
    }
}
