// Library root
// -----------
// This crate exposes the pieces the `booktransfer` binary is built from.
//
// Module responsibilities:
// - `api`: HTTP calls to the appliance (list, download, upload, delete).
// - `catalog`: resolves an index or name against a fetched listing.
// - `discovery`: finds the appliance on the local subnet.
// - `cli`: command-line flags and path/host normalisation.
// - `ui`: the workflows that tie the above together and print results.
pub mod api;
pub mod catalog;
pub mod cli;
pub mod discovery;
pub mod ui;
