use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;

use slurmgate::config::{Args, Settings};
use slurmgate::controller::JobController;
use slurmgate::http::{self, AppState};
use slurmgate::job::ledger::JobLedger;
use slurmgate::job::stage::JobStager;
use slurmgate::request::schema::RequestSchemas;
use slurmgate::slurm::adapter::SchedulerAdapter;
use slurmgate::slurm::command::ScriptTemplate;
use slurmgate::ssh::client::SshConnector;
use slurmgate::ssh::key::decode_private_key;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    info!("terve! starting up :)");

    let args = Args::parse();
    let settings = Settings::from(&args);

    let key = decode_private_key(&args.private_key).context("Can't load SSH_PRIVATE_KEY")?;
    let script = ScriptTemplate::new(&settings.script_template, &settings.script_dir)
        .context("Invalid SCRIPT_TEMPLATE")?;
    let schemas = RequestSchemas::load().context("Can't compile request schemas")?;

    info!("Jobs for {}@{} are staged under {}", settings.user, settings.host, settings.job_root);

    let connector = Arc::new(SshConnector::new(&settings, key));
    let controller = JobController::new(
        connector,
        JobStager::new(&settings.job_root),
        SchedulerAdapter::new(script),
        Arc::new(JobLedger::new()),
        settings.log_tail_lines,
    );

    let state = AppState { controller: Arc::new(controller), schemas: Arc::new(schemas) };
    http::serve(settings.listen, state).await.context("HTTP server failed")?;

    Ok(())
}
