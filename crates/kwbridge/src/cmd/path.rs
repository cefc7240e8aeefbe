use kwbridge_broker::BrokerConfig;
use kwbridge_transport::naming::{validate_socket_name, Platform};
use kwbridge_transport::socket_name_for_current_user;

use crate::cmd::PathArgs;
use crate::exit::{transport_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_record, OutputFormat};

/// Print the socket name extensions will try, and whether it can be bound.
///
/// Exits with a failure code when the name is over the platform limit.
pub fn run(args: PathArgs, format: OutputFormat) -> CliResult<i32> {
    let config = BrokerConfig::from_env();
    let team_id = args.apple_team_id.or(config.apple_team_id);

    let name = match config.socket_name {
        Some(name) => name,
        None => socket_name_for_current_user(team_id.as_deref())
            .map_err(|err| transport_error("cannot resolve socket name", err))?,
    };

    let platform = Platform::current();
    let len = name.as_os_str().len();
    let fits = validate_socket_name(platform, &name).is_ok();

    print_record(
        &[
            ("socket", name.display().to_string()),
            ("length", len.to_string()),
            ("max", platform.max_socket_name_len().to_string()),
            ("fits", fits.to_string()),
        ],
        format,
    );

    Ok(if fits { SUCCESS } else { FAILURE })
}
