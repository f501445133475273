use ipisock_peer::{Server, ServerConfig};

use crate::cmd::{parse_duration, ProbeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_probe, OutputFormat, ProbeOutput};

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let config = ServerConfig {
        port: args.endpoint.port,
        unix_socket: args.endpoint.unix.clone(),
        timeout: Some(timeout),
        launch_command: None,
    };

    let mut server = Server::bind(config).map_err(|err| peer_error("bind failed", err))?;
    let status = server
        .status()
        .map_err(|err| peer_error("status probe failed", err))?;
    if args.exit {
        server
            .send_exit()
            .map_err(|err| peer_error("sending exit failed", err))?;
    }

    let out = ProbeOutput {
        endpoint: server.endpoint().to_string(),
        status: status.to_string(),
        sent_exit: args.exit,
    };
    server
        .close()
        .map_err(|err| peer_error("close failed", err))?;

    print_probe(&out, format);
    Ok(SUCCESS)
}
