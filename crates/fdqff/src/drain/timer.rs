use std::{fmt::Display, ops::AddAssign, time::Duration};

#[derive(Clone, Debug, Default)]
pub(crate) struct Timer {
    pub(crate) writing_input: Duration,
    pub(crate) writing_script: Duration,
    pub(crate) submitting: Duration,
    pub(crate) reading: Duration,
    pub(crate) sleeping: Duration,
    pub(crate) removing: Duration,
}

impl AddAssign for Timer {
    fn add_assign(&mut self, rhs: Self) {
        self.writing_input += rhs.writing_input;
        self.writing_script += rhs.writing_script;
        self.submitting += rhs.submitting;
        self.reading += rhs.reading;
        self.sleeping += rhs.sleeping;
        self.removing += rhs.removing;
    }
}

impl Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1} s reading ok, {:.1} s writing input, {:.1} s writing script, \
             {:.1} s submitting, {:.1} s sleeping, {:.1} s removing",
            self.reading.as_secs_f64(),
            self.writing_input.as_secs_f64(),
            self.writing_script.as_secs_f64(),
            self.submitting.as_secs_f64(),
            self.sleeping.as_secs_f64(),
            self.removing.as_secs_f64(),
        )
    }
}
