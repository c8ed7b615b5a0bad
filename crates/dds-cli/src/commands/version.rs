//! Version command implementation.

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() {
    println!("lrgs-dds {VERSION}");
    println!();
    println!("DCP message distribution server.");
    println!();
    println!("Build info:");
    println!("  Protocol:     {}", dds_server::SERVER_PROTOCOL_VERSION);
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
}
