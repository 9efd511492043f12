fn main() {
    echogrid::cli::run();
}
