use guru_core::config::ConfigOverrides;

use crate::commands::{execute, CommandResult, Outcome};

pub fn run() -> CommandResult {
    execute("migrate", ConfigOverrides::default(), |_config, _pool| async {
        Ok(Outcome::message("applied pending migrations"))
    })
}
