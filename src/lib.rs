//! Submit model jobs to a SLURM cluster over SSH and poll them to completion
//!
//! The [`controller::JobController`] stages each job into its own remote work directory,
//! submits it with sbatch, and later derives its status from squeue and the files the job
//! leaves behind.

pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod job;
pub mod request;
pub mod slurm;
pub mod ssh;
