mod archivist;
mod cli;
mod commands;
mod env_loader;
mod error;
mod logging;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        match err.downcast_ref::<error::ArchivistError>() {
            Some(known) => eprintln!("error[{}]: {err:#}", known.code()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
}
