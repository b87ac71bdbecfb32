//! Talk to the SLURM command line tools on the cluster

/// Build sbatch, squeue, scancel and sacct invocations
pub mod command;

/// Run them and interpret their output
pub mod adapter;
