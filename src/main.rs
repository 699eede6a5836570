//! A TCP proxy that routes connections by TLS SNI or HTTP Host header.

#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate env_logger;
extern crate futures;
extern crate sniroute;
extern crate tokio_core;

use clap::{App, Arg};
use futures::future;
use tokio_core::reactor::Core;

use sniroute::config::AppConfig;
use sniroute::{privs, Server};

const CONFIG_ARG: &'static str = "CONFIG";

fn cli() -> App<'static, 'static> {
    App::new(crate_name!())
        .about(crate_description!())
        .version(crate_version!())
        .arg(
            Arg::with_name(CONFIG_ARG)
                .help("Path to the routing configuration (YAML or JSON)")
                .required(true)
                .index(1),
        )
}

fn main() {
    drop(env_logger::init());

    let opts = cli().get_matches();
    let app = {
        let path = opts.value_of(CONFIG_ARG).unwrap();
        AppConfig::load(path).expect("could not load configuration")
    };

    let mut core = Core::new().unwrap();
    let handle = core.handle();

    let mut servers = Vec::new();
    for spec in app.mk_listeners().expect("invalid listener configuration") {
        let server = Server::bind(&spec.addr, spec.protocol, spec.table, spec.fallback, &handle)
            .expect("failed to bind listener");
        servers.push(server);
    }

    // Privileges drop only after every socket is bound.
    if let Some(ref username) = app.username {
        privs::drop_privileges(username).expect("failed to drop privileges");
    }

    core.run(future::join_all(servers)).unwrap();
    info!("closing")
}
