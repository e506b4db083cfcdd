//! Smoke tests for Kubernetes cluster add-ons.
//!
//! Every check provisions disposable resources in a freshly named namespace, waits for the
//! add-on under test to converge on an observable state, tears everything down and reports
//! the outcome as a single notification.
pub mod aws;
pub mod checker;
pub mod checkers;
pub mod cli;
pub mod config;
pub mod datadog;
pub mod dns;
pub mod event;
pub mod http;
pub mod identity;
pub mod k8s;
pub mod lifecycle;
pub mod logging;
pub mod notify;
pub mod poller;
