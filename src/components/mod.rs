//! Built-in component kinds
//!
//! Every kind is a typed attribute struct deserialized from the overrides of
//! an environment's `[components.<name>]` table.

mod bundle;
mod command;
mod file;

pub use bundle::Bundle;
pub use command::Command;
pub use file::File;

use converge::{Catalog, ConfigureContext};

/// Catalog of the built-in kinds.
pub fn catalog() -> Catalog {
    Catalog::new()
        .with::<File>()
        .with::<Command>()
        .with::<Bundle>()
}

/// Replace `{{host}}` and `{{address}}` with the root's host name and address.
pub fn substitute(text: &str, ctx: &ConfigureContext<'_>) -> String {
    let address = ctx
        .address()
        .map_or_else(|| ctx.host().to_string(), |a| a.to_string());
    text.replace("{{host}}", ctx.host())
        .replace("{{address}}", &address)
}
