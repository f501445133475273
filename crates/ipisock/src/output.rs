use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use ipisock_peer::{ForceResult, Mat3};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct StepOutput<'a> {
    step: usize,
    energy: f64,
    forces: &'a [[f64; 3]],
    virial: &'a Mat3,
    #[serde(skip_serializing_if = "Option::is_none")]
    stress: Option<Mat3>,
}

/// Print one calculation result. `volume` is the cell volume in Å³; the
/// stress is only shown for periodic cells.
pub fn print_result(step: usize, result: &ForceResult, volume: f64, format: OutputFormat) {
    let stress = (volume > 0.0).then(|| result.stress(volume));
    match format {
        OutputFormat::Json => {
            let out = StepOutput {
                step,
                energy: result.energy,
                forces: &result.forces,
                virial: &result.virial,
                stress,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ATOM", "FX (eV/Å)", "FY (eV/Å)", "FZ (eV/Å)"]);
            for (index, force) in result.forces.iter().enumerate() {
                table.add_row(vec![
                    index.to_string(),
                    format!("{:.8}", force[0]),
                    format!("{:.8}", force[1]),
                    format!("{:.8}", force[2]),
                ]);
            }
            println!("step {step}: energy = {:.10} eV", result.energy);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let max_force = result
                .forces
                .iter()
                .map(|f| (f[0] * f[0] + f[1] * f[1] + f[2] * f[2]).sqrt())
                .fold(0.0, f64::max);
            println!(
                "step={} energy={:.10} atoms={} max_force={:.6} virial_trace={:.6}",
                step,
                result.energy,
                result.atom_count(),
                max_force,
                result.virial[0][0] + result.virial[1][1] + result.virial[2][2],
            );
        }
    }
}

#[derive(Serialize)]
pub struct SessionSummary {
    pub endpoint: String,
    pub steps: u64,
    pub engine: &'static str,
}

pub fn print_session(summary: &SessionSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "ENGINE", "STEPS"])
                .add_row(vec![
                    summary.endpoint.clone(),
                    summary.engine.to_string(),
                    summary.steps.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} engine={} steps={}",
                summary.endpoint, summary.engine, summary.steps
            );
        }
    }
}

#[derive(Serialize)]
pub struct ProbeOutput {
    pub endpoint: String,
    pub status: String,
    pub sent_exit: bool,
}

pub fn print_probe(out: &ProbeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "STATUS", "EXIT SENT"])
                .add_row(vec![
                    out.endpoint.clone(),
                    out.status.clone(),
                    out.sent_exit.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} status={} exit_sent={}",
                out.endpoint, out.status, out.sent_exit
            );
        }
    }
}
