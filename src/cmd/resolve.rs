//! Container name lookup (`shipyard resolve`).

pub fn cmd_resolve(url: &str) {
    println!("{}", shipyard::naming::resolve(url));
}
