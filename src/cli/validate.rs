//! `labgate validate`

use anyhow::Result;

use labgate::config::Config;
use labgate::security::CommandValidator;

/// Print the validation decision for `command` as JSON.
///
/// Exits with status 1 when the command is rejected so the subcommand can
/// be used from scripts.
pub(crate) fn cmd_validate(config: &Config, command: &str) -> Result<()> {
    let validator = config
        .security
        .extra_base_commands
        .iter()
        .fold(CommandValidator::new(), |v, cmd| v.register_base_command(cmd));

    let result = validator.validate(command);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.valid {
        std::process::exit(1);
    }
    Ok(())
}
