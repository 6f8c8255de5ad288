use jobq::geom::Atom;
use test_case::test_case;

use super::*;

#[test]
fn load() {
    let got = Config::load("testfiles/test.toml").unwrap();
    let want = Config {
        geometry: Geom::new(vec![
            Atom::new("O", 0.0, 0.0, -0.0657441568),
            Atom::new("H", 0.0, 0.7574590974, 0.5217905143),
            Atom::new("H", 0.0, -0.7574590974, 0.5217905143),
        ]),
        template: String::from(
            "memory,1,g
gthresh,energy=1.d-12,zero=1.d-22,oneint=1.d-22,twoint=1.d-22;
gthresh,optgrad=1.d-8,optstep=1.d-8;
nocompress;

geometry={
{{.geom}}
}
set,charge={{.charge}}
set,spin=0
basis=cc-pVTZ-F12
hf,accuracy=16,energy=1.0d-10
{CCSD(T)-F12,thrden=1.0d-8,thrvar=1.0d-10}
",
        ),
        queue_template: None,
        program: Program::Molpro,
        queue: Queue::Slurm,
        coord_type: CoordType::Cart,
        deriv: 4,
        charge: 0,
        step_size: 0.005,
        deltas: Some(String::from("1:0.005, 4:0.0075")),
        chunk_size: 16,
        job_limit: 2048,
        sleep_int: 2,
        check_int: 100,
        reuse: Reuse::Full,
        submit_retries: 15,
        queue_name: None,
        node: None,
        ncpus: 1,
        mem: String::from("8gb"),
        intder_cmd: String::from("intder"),
    };
    assert_eq!(got, want);

    let mut steps = vec![0.005; 9];
    steps[3] = 0.0075;
    assert_eq!(got.step_sizes().unwrap(), steps);
}

#[test]
fn bad_limit() {
    let got = Config::load("testfiles/bad_limit.toml");
    assert!(got.is_err());
}

#[test]
fn unknown_field() {
    let got: Result<Config, _> = toml::from_str(
        r#"
geometry = "H 0.0 0.0 0.0"
template = "{{.geom}}"
program = "molpro"
queue = "pbs"
coord_type = "grad"
optimize = true
"#,
    );
    assert!(got.is_err());
}

#[test]
fn template_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("molpro.in");
    std::fs::write(&path, "geometry={\n{{.geom}}\n}\n").unwrap();
    let src = format!(
        r#"
geometry = "H 0.0 0.0 0.0"
template = {{ file = "{}" }}
program = "molpro"
queue = "local"
coord_type = "sic"
"#,
        path.display()
    );
    let got: Config = toml::from_str(&src).unwrap();
    assert_eq!(got.template, "geometry={\n{{.geom}}\n}\n");
    assert_eq!(got.coord_type, CoordType::Sic);
    assert_eq!(got.reuse, Reuse::Pairs);
}

#[test]
fn builders() {
    let geom: Geom = "H 0.0 0.0 0.0\nH 0.0 0.0 0.74".parse().unwrap();
    let config = Config::new(
        geom,
        String::new(),
        Program::Molpro,
        Queue::Local,
        CoordType::Cart,
    )
    .deriv(2)
    .chunk_size(8)
    .job_limit(8);
    assert!(config.validate().is_ok());
    assert!(config.clone().deriv(5).validate().is_err());
    assert!(config.clone().chunk_size(0).validate().is_err());
    assert!(config.clone().step_size(-0.1).validate().is_err());
    assert!(config.deltas("7:0.01").validate().is_err());
}

#[test_case("", 3 => vec![0.005; 3]; "empty")]
#[test_case("  ", 3 => vec![0.005; 3]; "blank")]
#[test_case("1:0.01", 3 => vec![0.01, 0.005, 0.005]; "one")]
#[test_case("3 : 0.02, 1:0.01", 3 => vec![0.01, 0.005, 0.02]; "spaces")]
#[test_case(
    "1:0.005,2:0.010,3:0.015,4:0.0075", 4 => vec![0.005, 0.010, 0.015, 0.0075];
    "all four"
)]
#[test_case("4:0.0075", 4 => vec![0.005, 0.005, 0.005, 0.0075]; "gaps")]
fn deltas(input: &str, n: usize) -> Vec<f64> {
    parse_deltas(input, n, 0.005).unwrap()
}

#[test_case("1:0.01:2"; "too many colons")]
#[test_case("1"; "missing value")]
#[test_case("x:0.01"; "bad index")]
#[test_case("1:abc"; "bad value")]
#[test_case("0:0.01"; "index zero")]
#[test_case("4:0.01"; "index too large")]
#[test_case("2:-0.01"; "negative")]
#[test_case("2:0"; "zero")]
#[test_case("2:inf"; "infinite")]
fn bad_deltas(input: &str) {
    assert!(parse_deltas(input, 3, 0.005).is_err());
}

#[test]
fn zero_delta_at_load() {
    let got: Result<Config, _> = toml::from_str(
        r#"
geometry = "H 0.0 0.0 0.0"
template = "{{.geom}}"
program = "molpro"
queue = "local"
coord_type = "cart"
deltas = "2:0"
"#,
    );
    let err = got.unwrap_err().to_string();
    assert!(err.contains("must be positive"), "{err}");
}
