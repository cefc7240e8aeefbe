use std::time::Duration;

use serde_json::{json, Value};

use crate::cmd::SendArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let request = build_request(&args)?;
    exchange(&args, &request, timeout, format)
}

#[cfg(unix)]
fn exchange(
    args: &SendArgs,
    request: &Value,
    timeout: Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    use std::os::unix::process::parent_id;

    use kwbridge_broker::{handshake_message, BridgeClient, BrokerConfig};

    use crate::exit::{broker_error, SUCCESS};
    use crate::output::print_message;

    let mut config = BrokerConfig::from_env();
    if let Some(socket) = &args.socket {
        config = config.with_socket_name(socket.clone());
    }
    let socket = config
        .resolve_socket_name()
        .map_err(|err| broker_error("cannot resolve socket name", err))?;

    let ppid = if args.no_ppid {
        None
    } else {
        Some(args.ppid.unwrap_or_else(parent_id))
    };
    let handshake = handshake_message(
        &args.origin,
        args.pid.unwrap_or_else(std::process::id),
        ppid,
    );

    let mut client = BridgeClient::connect(&socket, &handshake)
        .map_err(|err| broker_error("connect failed", err))?;
    client
        .set_read_timeout(Some(timeout))
        .map_err(|err| broker_error("cannot set timeout", err))?;

    let response = client
        .request(request)
        .map_err(|err| broker_error("receive failed", err))?;
    print_message(&response, format);
    Ok(SUCCESS)
}

#[cfg(not(unix))]
fn exchange(
    _args: &SendArgs,
    _request: &Value,
    _timeout: Duration,
    _format: OutputFormat,
) -> CliResult<i32> {
    Err(CliError::new(
        crate::exit::FAILURE,
        "send is only supported over Unix domain sockets",
    ))
}

fn build_request(args: &SendArgs) -> CliResult<Value> {
    if let Some(raw) = &args.json {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --json: {err}")))?;
        if !value.is_object() {
            return Err(CliError::new(DATA_INVALID, "--json must be a JSON object"));
        }
        return Ok(value);
    }

    let mut request = json!({ "action": args.action });
    if let Some(client_id) = &args.client_id {
        request["clientID"] = json!(client_id);
    }
    Ok(request)
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cmd::Command;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Command,
    }

    fn send_args(argv: &[&str]) -> SendArgs {
        let mut full = vec!["kwbridge", "send"];
        full.extend_from_slice(argv);
        match TestCli::try_parse_from(full).unwrap().command {
            Command::Send(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn default_request_is_ping() {
        let request = build_request(&send_args(&[])).unwrap();
        assert_eq!(request, json!({"action": "ping"}));
    }

    #[test]
    fn client_id_is_added_to_request() {
        let request =
            build_request(&send_args(&["--action", "get-logins", "--client-id", "c1"])).unwrap();
        assert_eq!(request, json!({"action": "get-logins", "clientID": "c1"}));
    }

    #[test]
    fn json_request_must_be_an_object() {
        let err = build_request(&send_args(&["--json", "[1,2]"])).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);

        let request = build_request(&send_args(&["--json", r#"{"action":"x"}"#])).unwrap();
        assert_eq!(request["action"], "x");
    }
}
