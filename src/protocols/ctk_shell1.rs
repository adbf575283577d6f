#![allow(dead_code, non_camel_case_types, unused_unsafe, unused_variables)]
#![allow(non_upper_case_globals, non_snake_case, unused_imports)]
#![allow(missing_docs, clippy::all)]

use self::__interfaces::*;
use wayland_client;
use wayland_client::protocol::*;

pub mod __interfaces {
    use wayland_backend;
    use wayland_client::protocol::__interfaces::*;

    wayland_scanner::generate_interfaces!("src/protocols/ctk-shell1.xml");
}

wayland_scanner::generate_client_code!("src/protocols/ctk-shell1.xml");
