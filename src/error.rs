// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use thiserror::Error;

use crate::bridge::BridgeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Failed to read flow description: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid flow description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown checker '{0}'")]
    UnknownChecker(String),

    #[error("Invalid arguments for checker '{name}': {reason}")]
    InvalidCheckerArgs { name: String, reason: String },

    #[error("Unexpected output from '{command}': {output}")]
    UnexpectedOutput { command: String, output: String },
}

pub type Result<T> = std::result::Result<T, Error>;
