use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipisock_peer::{Geometry, Server, ServerConfig};
use tracing::{info, warn};

use crate::cmd::{parse_optional_duration, ServeArgs};
use crate::exit::{
    io_error, peer_error, CliError, CliResult, DATA_INVALID, INTERNAL, INTERRUPTED, SUCCESS,
};
use crate::output::{print_result, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let geometry = load_geometry(&args.geometry)?;

    let config = ServerConfig {
        port: args.endpoint.port,
        unix_socket: args.endpoint.unix.clone(),
        timeout: parse_optional_duration(args.timeout.as_deref())?,
        launch_command: args.launch.clone(),
    };

    let interrupt = Arc::new(Interrupt::default());
    install_ctrlc_handler(interrupt.clone(), args.endpoint.unix.clone())?;

    let mut server = Server::bind(config).map_err(|err| peer_error("bind failed", err))?;

    let volume = geometry.volume();
    for step in 0..args.steps {
        if interrupt.requested() {
            warn!(completed = step, "interrupted; stopping early");
            break;
        }
        let result = interrupt
            .blocking(|| server.calculate(&geometry))
            .map_err(|err| peer_error("calculate failed", err))?;
        print_result(step, &result, volume, format);
    }

    if args.exit {
        interrupt
            .blocking(|| server.send_exit())
            .map_err(|err| peer_error("sending exit failed", err))?;
    }

    interrupt
        .blocking(|| server.close())
        .map_err(|err| peer_error("close failed", err))?;
    if let Some(status) = server.exit_status() {
        info!(%status, "engine subprocess finished");
    }

    Ok(SUCCESS)
}

/// Ctrl-C state shared with the signal handler thread.
///
/// Between steps an interrupt only stops the loop. While the driver is
/// blocked on the engine nothing would observe the flag, so the handler
/// exits the process instead.
#[derive(Default)]
struct Interrupt {
    requested: AtomicBool,
    blocked: AtomicBool,
}

impl Interrupt {
    fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn blocking<T>(&self, call: impl FnOnce() -> T) -> T {
        self.blocked.store(true, Ordering::SeqCst);
        let out = call();
        self.blocked.store(false, Ordering::SeqCst);
        out
    }

    /// Record an interrupt; true when the caller must exit immediately.
    fn signal(&self) -> bool {
        self.requested.store(true, Ordering::SeqCst);
        self.blocked.load(Ordering::SeqCst)
    }
}

fn load_geometry(path: &Path) -> CliResult<Geometry> {
    let text = fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid geometry in {}: {err}", path.display()),
        )
    })
}

fn install_ctrlc_handler(interrupt: Arc<Interrupt>, unix_socket: Option<PathBuf>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if interrupt.signal() {
            warn!("interrupted while waiting on the engine; exiting");
            // Drop never runs on this path.
            if let Some(path) = &unix_socket {
                let _ = fs::remove_file(path);
            }
            std::process::exit(INTERRUPTED);
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
