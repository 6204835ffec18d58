use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};

use super::open_store;

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    std::fs::create_dir_all(settings.data_path())?;
    std::fs::create_dir_all(settings.inbox_dir())?;
    std::fs::create_dir_all(settings.sessions_dir())?;
    open_store(&settings)?;

    println!("Initialized penny at {}", settings.data_path().display());
    println!("Drop statements into {}", settings.inbox_dir().display());
    Ok(())
}
