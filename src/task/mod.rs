//! This module defines the process architecture of FPX, which we call
//! "master-server" because each worker corresponds to a `[[server]]` entry in
//! the config file. Since we're working with [`tokio`], processing units are
//! tasks as defined at [`tokio::task`]: light-weight non-blocking units of
//! execution scheduled entirely by Tokio, no threads or forks of our own.
//! The [`master`] task runs one [`server`] task per listening address and
//! fans the shutdown signal out to all of them; each server in turn waits on
//! its own connection tasks through [`crate::sync::drain`].

pub(crate) mod master;
pub(crate) mod server;
