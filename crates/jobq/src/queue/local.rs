use std::collections::HashSet;

use super::{Backoff, Meta, Queue, QueueError, SubQueue, Submit};

/// Minimal implementation for running calculations directly with bash. Each
/// submission blocks until its script finishes, so nothing is ever reported
/// as queued
#[derive(Debug)]
pub struct Local {
    pub dir: String,
    pub chunk_size: usize,
    pub job_limit: usize,
    pub no_del: bool,
    pub template: Option<String>,
    backoff: Backoff,
    meta: Meta,
}

impl Default for Local {
    fn default() -> Self {
        Self {
            dir: ".".to_string(),
            chunk_size: 128,
            job_limit: 1600,
            no_del: false,
            template: None,
            backoff: Backoff::default(),
            meta: Meta::default(),
        }
    }
}

impl Local {
    pub fn new(
        chunk_size: usize,
        job_limit: usize,
        dir: &str,
        no_del: bool,
        template: Option<String>,
    ) -> Self {
        Self {
            dir: dir.to_string(),
            chunk_size,
            job_limit,
            no_del,
            template,
            ..Self::default()
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
}

impl Submit for Local {}

impl Queue for Local {
    fn template(&self) -> &Option<String> {
        &self.template
    }

    fn default_submit_script(&self) -> String {
        "export MOLPRO_CMD=\"molpro -t 1 --no-xml-output\"\n".into()
    }
}

impl SubQueue for Local {
    const SCRIPT_EXT: &'static str = "sh";

    fn submit_command(&self) -> &str {
        "bash"
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn job_limit(&self) -> usize {
        self.job_limit
    }

    fn sleep_int(&self) -> usize {
        1
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
        Ok(HashSet::new())
    }

    fn no_del(&self) -> bool {
        self.no_del
    }
}
