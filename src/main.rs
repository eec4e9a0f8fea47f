mod cli;
mod commands;
mod env_loader;
mod logging;
mod remote;
mod zettel;

fn main() {
    env_loader::load_dotenv();
    logging::init();

    if let Err(err) = cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
