fn main() {
    if let Err(e) = envkit::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
