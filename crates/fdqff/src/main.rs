use std::{fs::File, os::unix::prelude::AsRawFd, path::Path, time::Duration};

use anyhow::{Context, bail};
use clap::Parser;
use fdqff::{
    Check, Opts, Plan, Run, drive, reference,
    config::{self, Config, CoordType},
    drain::install_handlers,
    ledger::Array,
    output::{ForceConstants, write_energies},
    plan::count,
    stencil::{ANGBOHR, Stencil},
    transform::{Intder, Transform, parse_file07},
};
use jobq::{
    geom::Geom,
    program::{Template, molpro::Molpro},
    queue::{Backoff, Meta, Queue, local::Local, pbs::Pbs, slurm::Slurm},
};

/// finite-difference quartic force fields
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// input file
    #[arg(value_parser, default_value_t = String::from("fdqff.toml"))]
    infile: String,

    /// Resume from the checkpoint files in the current directory. Defaults to
    /// false.
    #[arg(short, long, default_value_t = false)]
    checkpoint: bool,

    /// Overwrite existing output from a previous run. Defaults to false.
    #[arg(short, long, default_value_t = false)]
    overwrite: bool,

    /// Set the maximum number of threads to use. Defaults to 0, which means to
    /// use as many threads as there are CPUS.
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Don't delete any files when running the single-point energies. Defaults
    /// to false.
    #[arg(short, long, default_value_t = false)]
    no_del: bool,

    /// Print the number of single points the input file needs and exit.
    #[arg(long, default_value_t = false)]
    count: bool,
}

const PTS: &str = "pts";

fn meta(config: &Config, default_queue: Option<String>) -> Meta {
    Meta {
        queue: config.queue_name.clone().or(default_queue),
        node: config.node.clone(),
        ncpus: config.ncpus,
        mem: config.mem.clone(),
    }
}

fn backoff(config: &Config) -> Backoff {
    Backoff {
        retries: config.submit_retries,
        base: Duration::from_secs(1),
    }
}

/// the run for `config` around the reference energy `e0`, or the list of
/// points for a symmetry-internal run
fn build_run(
    config: &Config,
    e0: f64,
    points: Vec<Geom>,
) -> anyhow::Result<Run> {
    let geom = config.geometry.clone();
    Ok(match config.coord_type {
        CoordType::Cart => {
            let stencil = Stencil::new(ANGBOHR, config.step_sizes()?)?;
            Run::energies(geom, config.deriv, stencil, e0, config.reuse)?
        }
        CoordType::Grad => {
            let stencil = Stencil::new(ANGBOHR, config.step_sizes()?)?;
            Run::gradients(geom, config.deriv, stencil)?
        }
        CoordType::Sic => Run::points(points),
    })
}

fn run<Q>(config: &Config, args: &Args, queue: &Q) -> anyhow::Result<()>
where
    Q: Queue + Sync,
{
    let interrupt = install_handlers();
    let program = match config.program {
        config::Program::Molpro => {
            Molpro::new(Template::from(&config.template), config.charge)
        }
    };
    let check = if config.check_int == 0 {
        Check::None
    } else {
        Check::Some {
            check_int: config.check_int,
            check_dir: String::from("."),
        }
    };
    let opts = Opts { check, interrupt };
    let names = config.geometry.names();
    let (e0, points) = match config.coord_type {
        CoordType::Cart => {
            let e0 = reference(
                &config.geometry,
                PTS,
                queue,
                &program,
                &opts,
                args.checkpoint,
            )
            .context("failed to compute the reference energy")?;
            println!("reference energy: {e0:.12}");
            (e0, Vec::new())
        }
        CoordType::Grad => (0.0, Vec::new()),
        CoordType::Sic => {
            let points = Intder::new(&config.intder_cmd)
                .points(Path::new(PTS), &names)?;
            (0.0, points)
        }
    };
    let run = build_run(config, e0, points)?;
    if args.checkpoint {
        run.resume(".")?;
    }
    let plan = Plan::new(&run, PTS, config.chunk_size);
    drive(&run, plan, queue, &program, &opts)?;

    match config.coord_type {
        CoordType::Cart | CoordType::Grad => {
            let fcs = ForceConstants::new(&run);
            fcs.write(".", config.geometry.len())?;
            println!("harmonic force constants:\n{:.8}", fcs.fc2);
        }
        CoordType::Sic => write_energies(".", &run.values(Array::Energies))?,
    }
    Ok(())
}

/// the number of single points `config` needs, without running anything
fn count_points(config: &Config) -> anyhow::Result<usize> {
    let points = if config.coord_type == CoordType::Sic {
        let file07 = Path::new(PTS).join("file07");
        parse_file07(&file07, &config.geometry.names()).with_context(|| {
            format!("counting sic points needs {}", file07.display())
        })?
    } else {
        Vec::new()
    };
    let run = build_run(config, 0.0, points)?;
    Ok(count(&run, Plan::new(&run, PTS, config.chunk_size))?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = Config::load(&args.infile)
        .with_context(|| format!("failed to load {}", args.infile))?;
    if args.count {
        println!("{}", count_points(&config)?);
        return Ok(());
    }
    let path = Path::new("fdqff.out");
    if path.exists() && !args.overwrite {
        bail!("existing fdqff output. overwrite with -o/--overwrite");
    }
    let outfile = File::create(path).context("failed to create outfile")?;
    let logfile =
        File::create("fdqff.log").context("failed to create log file")?;
    let out_fd = outfile.as_raw_fd();
    let log_fd = logfile.as_raw_fd();
    // redirect stdout to outfile and stderr to logfile
    unsafe {
        libc::dup2(out_fd, 1);
        libc::dup2(log_fd, 2);
    }
    println!("PID: {}", std::process::id());
    println!("{config}");
    jobq::max_threads(args.threads);
    std::fs::create_dir_all(PTS).context("failed to create pts")?;

    let template = config.queue_template.clone();
    let (chunk, limit, sleep) =
        (config.chunk_size, config.job_limit, config.sleep_int);
    match config.queue {
        config::Queue::Pbs => {
            let queue =
                Pbs::new(chunk, limit, sleep, PTS, args.no_del, template);
            let default = queue.meta.queue.clone();
            let queue = queue
                .with_meta(meta(&config, default))
                .with_backoff(backoff(&config));
            run(&config, &args, &queue)?
        }
        config::Queue::Slurm => {
            let queue =
                Slurm::new(chunk, limit, sleep, PTS, args.no_del, template)
                    .with_meta(meta(&config, None))
                    .with_backoff(backoff(&config));
            run(&config, &args, &queue)?
        }
        config::Queue::Local => {
            let queue = Local::new(chunk, limit, PTS, args.no_del, template)
                .with_meta(meta(&config, None))
                .with_backoff(backoff(&config));
            run(&config, &args, &queue)?
        }
    }

    println!("normal termination of fdqff");
    Ok(())
}
