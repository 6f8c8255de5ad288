use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use test_case::test_case;

use crate::{
    geom::{Atom, Geom},
    program::{Encoder, Procedure, Template, molpro::Molpro},
};

use super::*;

/// a queue whose first `fails` submissions are rejected
struct Flaky {
    fails: Mutex<usize>,
    submitted: Mutex<Vec<String>>,
    backoff: Backoff,
    meta: Meta,
    template: Option<String>,
}

impl Flaky {
    fn new(fails: usize, retries: usize) -> Self {
        Self {
            fails: Mutex::new(fails),
            submitted: Mutex::new(Vec::new()),
            backoff: Backoff {
                retries,
                base: Duration::ZERO,
            },
            meta: Meta::default(),
            template: Some("#!/bin/sh\n# {{.basename}}\n".to_owned()),
        }
    }
}

impl Submit for Flaky {
    fn submit_once(&self, filename: &str) -> Result<String, QueueError> {
        let mut fails = self.fails.lock().unwrap();
        if *fails > 0 {
            *fails -= 1;
            return Err(QueueError::Command {
                cmd: "flaky".to_owned(),
                msg: "socket timed out".to_owned(),
            });
        }
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(filename.to_owned());
        Ok(format!("{}", submitted.len()))
    }
}

impl Queue for Flaky {
    fn default_submit_script(&self) -> String {
        String::new()
    }

    fn template(&self) -> &Option<String> {
        &self.template
    }
}

impl SubQueue for Flaky {
    const SCRIPT_EXT: &'static str = "sh";

    fn dir(&self) -> &str {
        "."
    }

    fn submit_command(&self) -> &str {
        "true"
    }

    fn chunk_size(&self) -> usize {
        1
    }

    fn job_limit(&self) -> usize {
        1
    }

    fn sleep_int(&self) -> usize {
        0
    }

    fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn status(&self) -> Result<HashSet<String>, QueueError> {
        Ok(["1"].map(String::from).into())
    }

    fn no_del(&self) -> bool {
        false
    }
}

#[test_case(0, 15, Some("1") ; "first try")]
#[test_case(3, 15, Some("1") ; "after retries")]
#[test_case(14, 15, Some("1") ; "last attempt")]
#[test_case(15, 15, None ; "exhausted")]
fn submit_with_backoff(fails: usize, retries: usize, want: Option<&str>) {
    let q = Flaky::new(fails, retries);
    let got = q.submit("main0.sh");
    match want {
        Some(id) => assert_eq!(got.unwrap(), id),
        None => assert!(matches!(
            got,
            Err(QueueError::Exhausted { attempts: 15, .. })
        )),
    }
}

#[test]
fn backoff_doubles() {
    let b = Backoff::default();
    assert_eq!(b.retries, 15);
    assert_eq!(b.delay(0), Duration::from_secs(1));
    assert_eq!(b.delay(4), Duration::from_secs(16));
    assert_eq!(b.delay(14), Duration::from_secs(16384));
}

#[test]
fn stat_marks_running() {
    let q = Flaky::new(0, 1);
    let mut jobs: HashMap<String, bool> =
        [("1".to_owned(), false), ("2".to_owned(), true)].into();
    q.stat(&mut jobs).unwrap();
    assert!(jobs["1"]);
    assert!(!jobs["2"]);
}

#[test]
fn resubmit_copies_input() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("job.0000000007");
    let name = name.to_str().unwrap();
    std::fs::write(format!("{name}.inp"), "geometry={}\n").unwrap();
    let q = Flaky::new(1, 3);
    let prog = Molpro::new(Template::from(""), 0);
    let got = q.resubmit(&prog, name).unwrap();
    assert_eq!(
        got,
        Resubmit {
            inp_file: format!("{name}_redo"),
            pbs_file: format!("{name}_redo.sh"),
            job_id: "1".to_owned(),
        }
    );
    assert_eq!(
        std::fs::read_to_string(format!("{name}_redo.inp")).unwrap(),
        "geometry={}\n"
    );
    assert_eq!(
        std::fs::read_to_string(&got.pbs_file).unwrap(),
        format!(
            "#!/bin/sh\n# job.0000000007_redo.sh\n\
             $MOLPRO_CMD {name}_redo.inp\n"
        )
    );
}

#[test]
fn local_runs_relative_inputs() {
    // relative to the working directory, like the default `pts`
    let tmp = tempfile::tempdir_in(".").unwrap();
    let dir = tmp.path().to_str().unwrap();
    let q = local::Local::new(
        1,
        1,
        dir,
        false,
        Some(
            "run() { cp \"$1\" \"${1%.inp}.out\"; }\nMOLPRO_CMD=run\n"
                .to_owned(),
        ),
    );
    let prog = Molpro::new(Template::from("geometry={\n{{.geom}}\n"), 0);
    let geom = Geom::new(vec![Atom::new("He", 0.0, 0.0, 0.0)]);
    let name = format!("{dir}/job.0000000000");
    prog.write_input(&name, &geom, Procedure::SinglePt).unwrap();
    let script = format!("{dir}/main0.sh");
    let cmd = q.program_cmd(&prog, &name);
    assert_eq!(cmd, format!("$MOLPRO_CMD {name}.inp"));
    q.write_submit_script([cmd], &script).unwrap();
    q.submit(&script).unwrap();
    assert_eq!(
        std::fs::read_to_string(format!("{name}.out")).unwrap(),
        std::fs::read_to_string(format!("{name}.inp")).unwrap(),
    );
}

#[test]
fn pbs_runs_from_script_dir() {
    let q = pbs::Pbs::new(1, 1, 1, "pts", false, None);
    let prog = Molpro::new(Template::from(""), 0);
    assert_eq!(
        q.program_cmd(&prog, "pts/job.0000000003"),
        "$MOLPRO_CMD job.0000000003.inp"
    );
}

#[test]
fn no_sleep_after_last_attempt() {
    let mut q = Flaky::new(100, 3);
    q.backoff.base = Duration::from_millis(100);
    let start = std::time::Instant::now();
    let got = q.submit("main0.sh");
    let elapsed = start.elapsed();
    assert!(matches!(got, Err(QueueError::Exhausted { attempts: 3, .. })));
    // 100 + 200 ms between the three attempts, but not the 400 after
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(650), "{elapsed:?}");
}
