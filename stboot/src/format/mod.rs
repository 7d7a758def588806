// SPDX-FileCopyrightText: 2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

pub mod archive;
pub mod descriptor;
pub mod manifest;
