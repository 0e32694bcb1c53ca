use clap::Parser;

use znuny_provision::cli::Args;
use znuny_provision::runtime::Runtime;

fn main() {
    let args = Args::parse();

    let rt = match Runtime::system() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: cannot open run log: {e}");
            std::process::exit(1);
        }
    };

    let uninstall = args.uninstall;
    let opts = args.into_options();
    if let Err(e) = znuny_provision::run(&rt, &opts, uninstall) {
        rt.logger.error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
