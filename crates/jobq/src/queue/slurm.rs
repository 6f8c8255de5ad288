use std::collections::HashSet;
use std::process::Command;

use super::{
    Backoff, Meta, Queue, QueueError, SubQueue, Submit, run_command,
};

/// Slurm is a type for holding the information for submitting a slurm job.
/// `filename` is the name of the Slurm submission script
#[derive(Debug)]
pub struct Slurm {
    chunk_size: usize,
    job_limit: usize,
    sleep_int: usize,
    dir: String,
    no_del: bool,
    backoff: Backoff,
    meta: Meta,
    pub(crate) template: Option<String>,
}

impl Slurm {
    pub fn new(
        chunk_size: usize,
        job_limit: usize,
        sleep_int: usize,
        dir: &str,
        no_del: bool,
        template: Option<String>,
    ) -> Self {
        Self {
            chunk_size,
            job_limit,
            sleep_int,
            dir: dir.to_owned(),
            no_del,
            backoff: Backoff::default(),
            meta: Meta::default(),
            template,
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// parse the output of `squeue -u $USER`. form of the output is:
    ///
    ///    JOBID PARTITION   NAME     USER ST        TIME  NODES NODELIST(REASON)
    /// 30627992   compute  c3oh-   mdavis  R 46-17:12:23      1 node2
    pub(crate) fn parse_status(lines: &str) -> HashSet<String> {
        let mut ret = HashSet::new();
        for line in lines.lines() {
            if line.contains("JOBID") {
                continue;
            }
            let fields: Vec<_> = line.split_whitespace().collect();
            if fields.len() < 5 {
                continue;
            }
            // exclude completing jobs to combat stuck completing bug
            if fields[4] != "CG" {
                ret.insert(fields[0].to_string());
            }
        }
        ret
    }
}

impl Submit for Slurm {}

impl Queue for Slurm {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn default_submit_script(&self) -> String {
        include_str!("../../templates/slurm/molpro").to_owned()
    }
}

impl SubQueue for Slurm {
    const SCRIPT_EXT: &'static str = "slurm";

    fn submit_command(&self) -> &str {
        "sbatch"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn job_limit(&self) -> usize {
        self.job_limit
    }

    fn sleep_int(&self) -> usize {
        self.sleep_int
    }

    fn dir(&self) -> &str {
        &self.dir
    }

    fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn status(&self) -> Result<HashSet<String>, QueueError> {
        let user = std::env::var("USER").unwrap_or_default();
        let out = run_command(Command::new("squeue").args(["-u", &user]))?;
        Ok(Self::parse_status(&out))
    }

    fn no_del(&self) -> bool {
        self.no_del
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn slurm() -> Slurm {
        Slurm::new(1, 1, 1, "/tmp", false, None)
    }

    #[test]
    fn molpro_slurm() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        slurm()
            .write_submit_script(
                ["opt0", "opt1"].map(|s| format!("$MOLPRO_CMD {s}.inp")),
                tmp.path().to_str().unwrap(),
            )
            .unwrap();
        let got = std::fs::read_to_string(tmp).unwrap();
        let got: Vec<&str> = got
            .lines()
            .filter(|l| {
                !(l.starts_with("#SBATCH --job-name")
                    || l.starts_with("#SBATCH -o"))
            })
            .collect();
        let got = got.join("\n");
        assert_snapshot!(got, @r#"
        #!/bin/bash
        #SBATCH --ntasks=1
        #SBATCH --cpus-per-task=1
        #SBATCH --no-requeue
        #SBATCH --mem=8gb
        export MOLPRO_CMD="/home/qc/bin/molpro2020.sh 1 1"
        $MOLPRO_CMD opt0.inp
        $MOLPRO_CMD opt1.inp
        "#);
    }

    #[test]
    fn status() {
        let got = Slurm::parse_status(
            "   JOBID PARTITION   NAME     USER ST        TIME  NODES NODELIST(REASON)
30627992   compute  c3oh-   mdavis  R 46-17:12:23      1 node2
30627993   compute  c3oh-   mdavis PD        0:00      1 (Priority)
30627994   compute  c3oh-   mdavis CG        0:00      1 node3
",
        );
        let want: HashSet<String> =
            ["30627992", "30627993"].map(String::from).into();
        assert_eq!(got, want);
    }
}
