//! Names and shapes the emitted bundle shares with the runtime.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Parameter list of every module factory. The positions are a wire
/// contract: clients (and the HMR runtime) index into this signature.
pub const FACTORY_PARAMS: &str =
    "global, _$$_REQUIRE, _$$_IMPORT_DEFAULT, _$$_IMPORT_ALL, module, exports, dependencyMap";

/// Registers a module factory under an id: `__d(factory, id, deps, name)`.
pub const DEFINE: &str = "__d";

/// Requires a registered module by id (lazy-init, memoized).
pub const REQUIRE: &str = "__r";

/// Global var the prelude defines so runtimes can alias the define/require
/// symbols.
pub const GLOBAL_PREFIX_VAR: &str = "__METRO_GLOBAL_PREFIX__";

/// Serializes a value as a JavaScript expression when formatted. JSON is a
/// subset of JS expression syntax, which is all the serializer needs.
pub struct StringifyJs<'a, T: Serialize>(pub &'a T);

impl<T: Serialize> Display for StringifyJs<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self.0).map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}
