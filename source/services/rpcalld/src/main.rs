//! CONTEXT: rpcalld entrypoint; installs the logger and hands off to the CLI
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    std::process::exit(rpcalld::run());
}
