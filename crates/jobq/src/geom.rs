use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeomError {
    #[error("expected `label x y z`, got `{0}`")]
    BadAtom(String),

    #[error("expected {want} coordinates for {atoms} atoms, got {got}")]
    Length {
        want: usize,
        atoms: usize,
        got: usize,
    },
}

/// A labeled atom with Cartesian coordinates in Å
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Atom {
    pub fn new(label: &str, x: f64, y: f64, z: f64) -> Self {
        Self {
            label: label.to_owned(),
            x,
            y,
            z,
        }
    }

    pub fn coord(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

impl FromStr for Atom {
    type Err = GeomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        let [label, x, y, z] = fields[..] else {
            return Err(GeomError::BadAtom(s.to_owned()));
        };
        let parse = |f: &str| {
            f.parse::<f64>()
                .map_err(|_| GeomError::BadAtom(s.to_owned()))
        };
        Ok(Self::new(label, parse(x)?, parse(y)?, parse(z)?))
    }
}

/// A Cartesian geometry. The `Display` form is the aligned layout used in
/// logs, while [geom_string] gives the form spliced into input files.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Geom {
    pub atoms: Vec<Atom>,
}

impl Display for Geom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for atom in &self.atoms {
            writeln!(
                f,
                "{:5}{:15.10}{:15.10}{:15.10}",
                atom.label, atom.x, atom.y, atom.z,
            )?
        }
        Ok(())
    }
}

impl FromStr for Geom {
    type Err = GeomError;

    /// Accepts bare `label x y z` lines as well as full XYZ files, where a
    /// lone atom count is followed by a comment line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut atoms = Vec::new();
        let mut skip = 0;
        for line in s.lines() {
            let fields = line.split_whitespace().count();
            if skip > 0 {
                skip -= 1;
            } else if fields == 0 {
                continue;
            } else if fields == 1 {
                skip = 1;
            } else {
                atoms.push(line.parse()?);
            }
        }
        Ok(Self { atoms })
    }
}

impl Geom {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms }
    }

    /// combine `names` with consecutive triples of `coords`
    pub fn from_parts(
        names: &[String],
        coords: &[f64],
    ) -> Result<Self, GeomError> {
        if 3 * names.len() != coords.len() {
            return Err(GeomError::Length {
                want: 3 * names.len(),
                atoms: names.len(),
                got: coords.len(),
            });
        }
        let atoms = names
            .iter()
            .zip(coords.chunks(3))
            .map(|(name, c)| Atom::new(name, c[0], c[1], c[2]))
            .collect();
        Ok(Self { atoms })
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.atoms.iter().map(|a| a.label.clone()).collect()
    }

    /// the flattened coordinates, `x₁ y₁ z₁ x₂ …`
    pub fn coords(&self) -> Vec<f64> {
        self.atoms.iter().flat_map(Atom::coord).collect()
    }
}

pub fn geom_string(geom: &Geom) -> String {
    use std::fmt::Write;
    let mut ret = String::with_capacity(50 * geom.len());
    for g in &geom.atoms {
        // writing to a String cannot fail
        let _ =
            writeln!(ret, "{} {:.12} {:.12} {:.12}", g.label, g.x, g.y, g.z);
    }
    ret
}
