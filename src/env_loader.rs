use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(
    archivist_home: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    match archivist_home {
        Some(home) => Some(home.join(".env")),
        None => Some(home_dir?.join(".archivist/.env")),
    }
}

/// `./.env` first, then the archivist home's `.env`.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("ARCHIVIST_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file()
        && let Err(err) = dotenvy::from_path(&path)
    {
        eprintln!("warning: failed to load {}: {err}", path.display());
    }
}
