fn main() {
    if let Err(e) = omescale::run() {
        tracing::error!("Processing failed: {e}");
        std::process::exit(1);
    }
}
