use log::*;
use std::ffi::CString;
use std::process;

use clap::{
    crate_version, value_t, value_t_or_exit, values_t, App, AppSettings, Arg, ArgMatches,
    SubCommand,
};
use nix::unistd::{self, ForkResult, Pid};

use fstrace::bootstrap;
use fstrace::latch;
use fstrace::reporter::LogReporter;
use fstrace::tracer;

fn cstring_or_exit(value: &str, what: &str) -> CString {
    match CString::new(value) {
        Ok(value) => value,
        Err(_) => {
            error!("{} contains a NUL byte", what);
            process::exit(1);
        }
    }
}

fn trace(args: &ArgMatches) {
    let raw_pid = value_t_or_exit!(args, "pid", i32);
    if raw_pid <= 0 {
        error!("invalid tracee pid '{}'", raw_pid);
        process::exit(1);
    }
    let pid = Pid::from_raw(raw_pid);
    // the executable is a hint only; tracing works without it
    let exe = value_t!(args, "exe", String).unwrap_or_default();

    let reporter = Box::new(LogReporter::new(exe.clone(), args.is_present("exec-args")));
    let latch_name = latch::latch_name(pid);
    if let Err(err) = tracer::attach_to_process(reporter, pid, &exe, &latch_name) {
        error!("{}", err);
        process::exit(1);
    }
}

fn run(args: &ArgMatches) {
    let command = values_t!(args, "command", String).unwrap_or_else(|e| e.exit());
    let report_args = args.is_present("exec-args");
    let fam = value_t!(args, "fam", String).ok();

    match unsafe { unistd::fork() } {
        Ok(ForkResult::Child) => {
            // tracee: rendezvous with the tracer, then become the command
            let file = cstring_or_exit(&command[0], "command");
            let argv: Vec<CString> = command
                .iter()
                .map(|arg| cstring_or_exit(arg, "argument"))
                .collect();
            let envp: Vec<CString> = std::env::vars()
                .map(|(key, value)| cstring_or_exit(&format!("{}={}", key, value), "environment"))
                .collect();
            let fam = fam.map(|path| cstring_or_exit(&path, "manifest path"));

            match bootstrap::execute_with_sandbox(&file, &argv, &envp, fam.as_deref()) {
                Ok(errno) => {
                    error!("cannot execute {}: errno {}", command[0], errno);
                    process::exit(1);
                }
                Err(err) => {
                    error!("{}", err);
                    process::exit(1);
                }
            }
        }
        Ok(ForkResult::Parent { child }) => {
            let reporter = Box::new(LogReporter::new(command[0].clone(), report_args));
            let latch_name = latch::latch_name(child);
            if let Err(err) = tracer::attach_to_process(reporter, child, &command[0], &latch_name) {
                error!("{}", err);
                process::exit(1);
            }
        }
        Err(err) => {
            error!("cannot fork the tracee: {}", err);
            process::exit(1);
        }
    }
}

fn setup_logging(matches: &clap::ArgMatches) {
    if matches.is_present("verbose") {
        env_logger::Builder::new().parse_filters("debug").init();
        return;
    }

    let loglevel = matches.value_of("loglevel");
    if let Some(level) = loglevel {
        env_logger::Builder::new().parse_filters(level).init();
        return;
    }

    // default
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

fn main() {
    let trace_command = SubCommand::with_name("trace")
        .about("Attach to a process waiting on its rendezvous latch and trace it.")
        .version(crate_version!())
        .arg(
            Arg::with_name("pid")
                .help("Pid of the tracee to attach to")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("exe")
                .short("x")
                .long("exe")
                .takes_value(true)
                .help("Path to the tracee's executable, used until its first exec"),
        )
        .arg(
            Arg::with_name("exec-args")
                .long("exec-args")
                .help("Also report the argument vector of every exec"),
        );

    let run_command = SubCommand::with_name("run")
        .about("Launch a command under the sandbox and trace it.")
        .version(crate_version!())
        .arg(
            Arg::with_name("fam")
                .long("fam")
                .takes_value(true)
                .help("File-access-manifest handle handed to the sink in the target environment"),
        )
        .arg(
            Arg::with_name("exec-args")
                .long("exec-args")
                .help("Also report the argument vector of every exec"),
        )
        .arg(
            Arg::with_name("command")
                .help("Command to run under the sandbox")
                .multiple(true)
                .required(true)
                .index(1),
        );

    let main_app = App::new("fstrace")
        .about("Observe the filesystem accesses of a process tree.")
        .version(crate_version!())
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .conflicts_with("loglevel")
                .help("shorthand for --loglevel debug)"),
        )
        .arg(
            Arg::with_name("loglevel")
                .short("l")
                .takes_value(true)
                .help("Finegrained verbosity control. See docs.rs/env_logger. Examples: [error, warn, info, debug, trace]"),
        )
        .subcommand(trace_command)
        .subcommand(run_command);

    let matches = main_app.get_matches();
    setup_logging(&matches);
    match matches.subcommand() {
        ("trace", Some(sub_matches)) => trace(sub_matches),
        ("run", Some(sub_matches)) => run(sub_matches),
        ("", None) => unreachable!(), // because of AppSettings::SubcommandRequiredElseHelp
        _ => unreachable!(),
    }
}
