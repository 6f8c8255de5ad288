use std::{fs::read_to_string, path::Path, sync::OnceLock};

use regex::Regex;

use crate::geom::{Geom, geom_string};

use super::{
    Decoder, Encoder, Procedure, ProgramError, ProgramResult, Template,
    parse_energy,
};

#[cfg(test)]
mod tests;

#[derive(Clone, Debug)]
pub struct Molpro {
    template: Template,
    charge: isize,
}

static CELL: OnceLock<[Regex; 4]> = OnceLock::new();
static INPUT_CELL: OnceLock<[Regex; 4]> = OnceLock::new();

impl Molpro {
    pub fn new(template: Template, charge: isize) -> Self {
        Self { template, charge }
    }
}

impl Encoder for Molpro {
    fn extension(&self) -> &'static str {
        "inp"
    }

    /// Example [Template]:
    /// ```text
    /// memory,1,g
    /// gthresh,energy=1.d-12,zero=1.d-22,oneint=1.d-22,twoint=1.d-22;
    /// nocompress;
    ///
    /// geometry={
    /// {{.geom}}
    /// basis={
    /// default,cc-pVTZ-f12
    /// }
    /// set,charge={{.charge}}
    /// set,spin=0
    /// hf,accuracy=16,energy=1.0d-10
    /// {CCSD(T)-F12,thrden=1.0d-8,thrvar=1.0d-10}
    /// fdqff = energy
    /// ```
    ///
    /// `{{.geom}}` is replaced with the geometry followed by the closing
    /// brace, and `{{.charge}}` with the molecular charge. Any `optg` line is
    /// dropped. For [Procedure::Gradient] a `{forces}` line is appended
    /// unless the template already requests forces.
    fn write_input(
        &self,
        filename: &str,
        geom: &Geom,
        proc: Procedure,
    ) -> std::io::Result<()> {
        use std::fmt::Write;
        let [optg_line, forces, charge, geom_re] = INPUT_CELL.get_or_init(|| {
            [
                Regex::new(r"(?i)^.*optg(,|\s*$)").unwrap(),
                Regex::new(r"(?i)\bforces\b").unwrap(),
                Regex::new(r"\{\{.charge\}\}").unwrap(),
                Regex::new(r"\{\{.geom\}\}").unwrap(),
            ]
        });
        let mut body = String::with_capacity(self.template.header.len());
        for line in self.template.header.lines() {
            if !optg_line.is_match(line) {
                let _ = writeln!(body, "{line}");
            }
        }
        if proc == Procedure::Gradient && !forces.is_match(&body) {
            body.push_str("{forces}\n");
        }
        let geom = format!("{}}}\n", geom_string(geom));
        let body = geom_re.replace(&body, geom.as_str());
        let body = charge.replace(&body, self.charge.to_string().as_str());
        std::fs::write(format!("{filename}.{}", self.extension()), &*body)
    }

    fn command(&self, filename: &str) -> String {
        format!("$MOLPRO_CMD {filename}.inp")
    }
}

impl Decoder for Molpro {
    fn read_output(
        &self,
        filename: &str,
    ) -> Result<ProgramResult, ProgramError> {
        let outfile = format!("{filename}.out");
        if !Path::new(&outfile).exists() {
            return Err(ProgramError::NotFound(outfile));
        }
        let contents = match read_to_string(&outfile) {
            Ok(s) => s,
            Err(e) => {
                return Err(ProgramError::ReadFile(outfile, e.kind()));
            }
        };
        if contents.trim().is_empty() {
            return Err(ProgramError::BlankOutput(outfile));
        }

        let [panic_re, error_re, time_re, energy_re] = CELL.get_or_init(|| {
            [
                Regex::new("(?i)panic").unwrap(),
                Regex::new(r"(?i)\berror\b").unwrap(),
                Regex::new(r"^ REAL TIME").unwrap(),
                Regex::new(r"^\s*FDQFF\s+=").unwrap(),
            ]
        });

        let mut energy = None;
        let mut time = 0.0;
        let mut grad: [Option<Vec<f64>>; 3] = [None, None, None];
        for line in contents.lines() {
            if panic_re.is_match(line) {
                return Err(ProgramError::Sentinel {
                    file: outfile,
                    line: line.trim().to_owned(),
                });
            } else if error_re.is_match(line) {
                return Err(ProgramError::ContainsError {
                    file: outfile,
                    line: line.trim().to_owned(),
                });
            } else if energy_re.is_match(line) {
                energy = parse_energy(line, 2, &outfile)?;
            } else if time_re.is_match(line) {
                // REAL TIME  *      1.23 SEC
                let fields: Vec<_> = line.split_whitespace().collect();
                if fields.len() >= 2 {
                    time = fields[fields.len() - 2].parse().unwrap_or(0.0);
                }
            } else if let Some(axis) = grad_axis(line) {
                grad[axis] = Some(parse_grad(line, &outfile)?);
            }
        }
        let Some(energy) = energy else {
            return Err(ProgramError::EnergyNotFound(outfile));
        };
        let gradient = match grad {
            [None, None, None] => None,
            [Some(x), Some(y), Some(z)]
                if x.len() == y.len() && x.len() == z.len() =>
            {
                Some(
                    x.iter()
                        .zip(&y)
                        .zip(&z)
                        .flat_map(|((x, y), z)| [*x, *y, *z])
                        .collect(),
                )
            }
            _ => return Err(ProgramError::GradientParse(outfile)),
        };
        Ok(ProgramResult {
            energy,
            gradient,
            time,
        })
    }
}

fn grad_axis(line: &str) -> Option<usize> {
    let line = line.trim_start();
    if line.starts_with("GRADX") {
        Some(0)
    } else if line.starts_with("GRADY") {
        Some(1)
    } else if line.starts_with("GRADZ") {
        Some(2)
    } else {
        None
    }
}

/// parse the bracketed list in a line like `GRADX(1:3) = [ 0.1 0.2 0.3 ]`
fn parse_grad(line: &str, outname: &str) -> Result<Vec<f64>, ProgramError> {
    let err = || ProgramError::GradientParse(outname.to_owned());
    let start = line.find('[').ok_or_else(err)?;
    let end = line.rfind(']').ok_or_else(err)?;
    if end < start {
        return Err(err());
    }
    line[start + 1..end]
        .split_whitespace()
        .map(|s| s.parse::<f64>().map_err(|_| err()))
        .collect()
}
