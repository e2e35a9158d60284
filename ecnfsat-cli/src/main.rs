use std::env;
use std::fs;
use std::io::{self, BufRead, Write};

use anyhow::{bail, Context as _};
use clap::{App, AppSettings, Arg};
use env_logger::{fmt, Builder, Target};
use log::{error, info, Level, LevelFilter, Record};

use ecnfsat::{
    AggSaving, DefSemantics, DefnStrategy, Lit, PolarityMode, Solver, SolverConfig, UfsAlgo,
};

mod ecnf;

/// Exit codes of the reference adapter; 0 is reserved for informational runs such as `--help`.
const EXIT_SAT: i32 = 10;
const EXIT_UNSAT: i32 = 20;
const EXIT_ERROR: i32 = 1;

fn main() {
    let exit_code = match main_with_err() {
        Err(err) => {
            error!("{:#}", err);
            EXIT_ERROR
        }
        Ok(exit_code) => exit_code,
    };
    std::process::exit(exit_code);
}

fn init_logging(verbosity: u64) {
    let format = |buf: &mut fmt::Formatter, record: &Record| {
        if record.level() == Level::Info {
            writeln!(buf, "c {}", record.args())
        } else {
            writeln!(buf, "c {}: {}", record.level(), record.args())
        }
    };

    let filter = match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = Builder::new();
    builder.target(Target::Stdout).format(format).filter(None, filter);

    if let Ok(ref env_var) = env::var("ECNFSAT_LOG") {
        builder.parse_filters(env_var);
    }

    builder.init();
}

fn main_with_err() -> anyhow::Result<i32> {
    let matches = App::new("ecnfsat")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A CDCL based solver for extended CNF")
        .setting(AppSettings::DisableHelpSubcommand)
        .arg_from_usage("[INPUT] 'The input file to use (stdin if omitted)'")
        .arg_from_usage("[OUTPUT] 'The output file to use (stdout if omitted)'")
        .arg(
            Arg::with_name("models")
                .short("n")
                .value_name("N")
                .help("Number of models to search for, 0 for all")
                .takes_value(true)
                .default_value("1"),
        )
        .arg(
            Arg::from_usage("[polarity-mode] --polarity-mode=[MODE] 'Initial branching polarity'")
                .possible_values(&["true", "false", "rnd", "stored"])
                .default_value("false"),
        )
        .arg_from_usage("[decay] --decay=[D] 'Variable activity decay factor in (0,1]'")
        .arg_from_usage("[rnd-freq] --rnd-freq=[F] 'Frequency of random branches in [0,1]'")
        .arg(
            Arg::from_usage("[verbosity] --verbosity=[N] 'Verbosity of the progress output'")
                .default_value("1"),
        )
        .arg(
            Arg::from_usage(
                "[defn-strategy] --defn-strategy=[S] 'When the unfounded-set search runs'",
            )
            .possible_values(&["always", "adaptive", "lazy"])
            .default_value("always"),
        )
        .arg(
            Arg::from_usage("[idsem] --idsem=[SEM] 'Semantics of inductive definitions'")
                .possible_values(&["wellf", "stable"])
                .default_value("wellf"),
        )
        .arg(
            Arg::from_usage("[ufsalgo] --ufsalgo=[A] 'Search order of the unfounded-set search'")
                .possible_values(&["depth", "breadth"])
                .default_value("breadth"),
        )
        .arg(
            Arg::from_usage("[format] --format=[F] 'Input format'")
                .possible_values(&["fodot", "fz", "asp", "opb"])
                .default_value("fodot"),
        )
        .arg(
            Arg::from_usage("[outputformat] --outputformat=[F] 'Output format'")
                .possible_values(&["fodot", "asp", "plain", "fz", "opb"])
                .default_value("plain"),
        )
        .arg(
            Arg::from_usage(
                "[tocnf] --tocnf=[B] 'Compile equivalence card/sum aggregates to CNF'",
            )
            .possible_values(&["yes", "no"])
            .default_value("no"),
        )
        .arg(
            Arg::from_usage("[aggsaving] --aggsaving=[N] 'Eager aggregate head implications'")
                .possible_values(&["0", "1", "2"])
                .default_value("0"),
        )
        .arg_from_usage("[randomseed] --randomseed=[N] 'Seed of the branching RNG'")
        .arg_from_usage("[maxlearnt] --maxlearnt=[N] 'Cap on the learnt clause database, 0 for none'")
        .get_matches();

    let verbosity = matches
        .value_of("verbosity")
        .unwrap_or("1")
        .parse::<u64>()
        .context("--verbosity expects a number")?;
    init_logging(verbosity);

    info!("This is ecnfsat {}", env!("CARGO_PKG_VERSION"));

    let mut config = SolverConfig::default();

    config.polarity_mode = match matches.value_of("polarity-mode").unwrap_or("false") {
        "true" => PolarityMode::True,
        "false" => PolarityMode::False,
        "rnd" => PolarityMode::Random,
        _ => PolarityMode::Stored,
    };

    if let Some(decay) = matches.value_of("decay") {
        let decay = decay.parse::<f32>().context("--decay expects a number")?;
        if !(decay > 0.0 && decay <= 1.0) {
            bail!("--decay must lie in (0, 1]");
        }
        config.vsids_decay = decay.min(0.999);
    }

    if let Some(freq) = matches.value_of("rnd-freq") {
        let freq = freq.parse::<f64>().context("--rnd-freq expects a number")?;
        if !(0.0..=1.0).contains(&freq) {
            bail!("--rnd-freq must lie in [0, 1]");
        }
        config.random_branch_freq = freq;
    }

    config.defn_strategy = match matches.value_of("defn-strategy").unwrap_or("always") {
        "adaptive" => DefnStrategy::Adaptive,
        "lazy" => DefnStrategy::Lazy,
        _ => DefnStrategy::Always,
    };

    config.def_semantics = match matches.value_of("idsem").unwrap_or("wellf") {
        "stable" => DefSemantics::Stable,
        _ => DefSemantics::WellFounded,
    };

    config.ufs_algo = match matches.value_of("ufsalgo").unwrap_or("breadth") {
        "depth" => UfsAlgo::Depth,
        _ => UfsAlgo::Breadth,
    };

    config.to_cnf = matches.value_of("tocnf") == Some("yes");

    config.agg_saving = match matches.value_of("aggsaving").unwrap_or("0") {
        "1" => AggSaving::EagerClauses,
        "2" => AggSaving::Both,
        _ => AggSaving::PropagatorOnly,
    };

    if let Some(seed) = matches.value_of("randomseed") {
        config.random_seed = seed.parse().context("--randomseed expects a number")?;
    }

    if let Some(cap) = matches.value_of("maxlearnt") {
        config.max_learnts = cap.parse().context("--maxlearnt expects a number")?;
    }

    let models_wanted = matches
        .value_of("models")
        .unwrap_or("1")
        .parse::<u64>()
        .context("-n expects a number")?;

    match matches.value_of("format").unwrap_or("fodot") {
        "fodot" => (),
        other => bail!("input format {:?} is not supported by this build", other),
    }

    let mut solver = Solver::with_config(config);

    match matches.value_of("INPUT") {
        Some(path) => {
            info!("Reading ECNF from {}", path);
            let file = fs::File::open(path).with_context(|| format!("opening {}", path))?;
            ecnf::load(io::BufReader::new(file), &mut solver)?;
        }
        None => {
            info!("Reading ECNF from standard input");
            let stdin = io::stdin();
            let lock: &mut dyn BufRead = &mut stdin.lock();
            ecnf::load(lock, &mut solver)?;
        }
    }

    let mut output: Box<dyn Write> = match matches.value_of("OUTPUT") {
        Some(path) => {
            Box::new(fs::File::create(path).with_context(|| format!("creating {}", path))?)
        }
        None => Box::new(io::stdout()),
    };

    run_solver(&mut solver, models_wanted, &mut output)
}

/// Search for the requested number of models and print them.
fn run_solver(
    solver: &mut Solver,
    models_wanted: u64,
    output: &mut dyn Write,
) -> anyhow::Result<i32> {
    let mut found = 0u64;

    loop {
        let model = match solver.next_model() {
            Ok(Some(model)) => model,
            Ok(None) => break,
            Err(err) => return Err(err.into()),
        };

        if found == 0 {
            writeln!(output, "SAT")?;
        }
        found += 1;
        print_model(output, &model)?;

        if models_wanted != 0 && found >= models_wanted {
            break;
        }
    }

    if found == 0 {
        writeln!(output, "UNSAT")?;
        return Ok(EXIT_UNSAT);
    }

    info!("{} model(s) found", found);
    Ok(EXIT_SAT)
}

/// One line per model: sign-prefixed 1-based variables, terminated with " 0".
fn print_model(output: &mut dyn Write, model: &[Lit]) -> anyhow::Result<()> {
    let mut line = String::new();
    for lit in model {
        line.push_str(&lit.to_dimacs().to_string());
        line.push(' ');
    }
    line.push('0');
    writeln!(output, "{}", line)?;
    Ok(())
}
