use std::fs::{read_to_string, write};

use test_case::test_case;

use crate::{
    geom::{Atom, Geom},
    program::{
        Decoder, Encoder, Procedure, ProgramError, ProgramResult, Template,
    },
};

use super::Molpro;

fn templ() -> Template {
    Template::from(
        "memory,1,g
geometry={
{{.geom}}
basis={
default,cc-pVTZ-f12
}
set,charge={{.charge}}
hf,accuracy=16,energy=1.0d-10
{optg,grms=1.d-8,srms=1.d-8}
fdqff = energy",
    )
}

fn water() -> Geom {
    Geom::new(vec![
        Atom::new("H", 0.0, 0.757, 0.522),
        Atom::new("O", 0.0, 0.0, -0.066),
        Atom::new("H", 0.0, -0.757, 0.522),
    ])
}

#[test]
fn write_single_point() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("job.0000000001");
    let name = name.to_str().unwrap();
    Molpro::new(templ(), 1)
        .write_input(name, &water(), Procedure::SinglePt)
        .unwrap();
    let got = read_to_string(format!("{name}.inp")).unwrap();
    let want = "memory,1,g
geometry={
H 0.000000000000 0.757000000000 0.522000000000
O 0.000000000000 0.000000000000 -0.066000000000
H 0.000000000000 -0.757000000000 0.522000000000
}

basis={
default,cc-pVTZ-f12
}
set,charge=1
hf,accuracy=16,energy=1.0d-10
fdqff = energy
";
    assert_eq!(got, want);
}

#[test]
fn write_gradient() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("grad");
    let name = name.to_str().unwrap();
    Molpro::new(templ(), 0)
        .write_input(name, &water(), Procedure::Gradient)
        .unwrap();
    let got = read_to_string(format!("{name}.inp")).unwrap();
    assert!(got.ends_with("fdqff = energy\n{forces}\n"));
    assert!(!got.contains("optg"));
}

#[test]
fn command_keeps_path() {
    let m = Molpro::new(templ(), 0);
    assert_eq!(
        m.command("pts/job.0000000003"),
        "$MOLPRO_CMD pts/job.0000000003.inp"
    );
}

const ENERGY: &str = " Variable memory released

 FDQFF          =       -76.369839620286

 REAL TIME  *         2.15 SEC
 Molpro calculation terminated
";

const GRADIENT: &str = " FDQFF          =       -76.369839620286
 GRADX(1:3)     = [ 0.0  0.0  0.0 ]
 GRADY(1:3)     = [ 0.01  0.0 -0.01 ]
 GRADZ(1:3)     = [ 0.02 -0.04  0.02 ]
 REAL TIME  *         3.50 SEC
";

#[test]
fn read_energy() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("job");
    let name = name.to_str().unwrap();
    write(format!("{name}.out"), ENERGY).unwrap();
    let got = Molpro::new(templ(), 0).read_output(name).unwrap();
    assert_eq!(
        got,
        ProgramResult {
            energy: -76.369839620286,
            gradient: None,
            time: 2.15,
        }
    );
}

#[test]
fn read_gradient() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("job");
    let name = name.to_str().unwrap();
    write(format!("{name}.out"), GRADIENT).unwrap();
    let got = Molpro::new(templ(), 0).read_output(name).unwrap();
    assert_eq!(
        got.gradient.unwrap(),
        vec![0.0, 0.01, 0.02, 0.0, 0.0, -0.04, 0.0, -0.01, 0.02]
    );
    approx::assert_abs_diff_eq!(got.time, 3.5);
}

#[test_case("", "blank" ; "empty file")]
#[test_case("\n  \n", "blank" ; "whitespace only")]
#[test_case(" ? Error in basis set\n", "error" ; "error line")]
#[test_case(" panic in the disco\n", "sentinel" ; "sentinel")]
#[test_case(" REAL TIME  *  1.0 SEC\n", "energy" ; "no energy")]
#[test_case(" GRADX(1:3) = [ 0.0 0.0 0.0 ]\n FDQFF = -1.0\n", "gradient" ; "partial gradient")]
fn read_errors(contents: &str, want: &str) {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("job");
    let name = name.to_str().unwrap();
    write(format!("{name}.out"), contents).unwrap();
    let got = Molpro::new(templ(), 0).read_output(name).unwrap_err();
    let kind = match got {
        ProgramError::BlankOutput(_) => "blank",
        ProgramError::ContainsError { .. } => "error",
        ProgramError::Sentinel { .. } => "sentinel",
        ProgramError::EnergyNotFound(_) => "energy",
        ProgramError::GradientParse(_) => "gradient",
        e => panic!("unexpected error {e}"),
    };
    assert_eq!(kind, want);
}

#[test]
fn structured_error_keeps_line() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("job");
    let name = name.to_str().unwrap();
    write(format!("{name}.out"), " ok\n ? Error in basis set\n").unwrap();
    let got = Molpro::new(templ(), 0).read_output(name).unwrap_err();
    assert!(got.is_structured());
    assert_eq!(
        got,
        ProgramError::ContainsError {
            file: format!("{name}.out"),
            line: "? Error in basis set".to_owned(),
        }
    );
}

#[test]
fn read_missing() {
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("nothing");
    let got = Molpro::new(templ(), 0)
        .read_output(name.to_str().unwrap())
        .unwrap_err();
    assert!(got.is_not_found());
}
