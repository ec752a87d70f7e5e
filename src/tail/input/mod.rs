// SPDX-License-Identifier: Apache-2.0

mod reader;

pub use reader::{FileReader, LogLine, ReaderState};
