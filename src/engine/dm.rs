// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Get ability to instantiate a devicemapper context.

use std::sync::OnceLock;

use devicemapper::{DmResult, DM};

use crate::migrator::{MigratorError, MigratorResult};

static DM_CONTEXT: OnceLock<DmResult<DM>> = OnceLock::new();

/// Get the process-wide devicemapper context, creating it on first use.
pub fn get_dm() -> MigratorResult<&'static DM> {
    match DM_CONTEXT.get_or_init(DM::new) {
        Ok(dm) => Ok(dm),
        Err(err) => Err(MigratorError::Msg(format!(
            "Failed to initialize devicemapper context: {err}"
        ))),
    }
}
