//! IPC (Inter-Process Communication) Module
//!
//! Handles communication between the Tauri backend and the webview frontend.
//! All Tauri commands, event payloads, and DTOs are defined here.

pub mod commands;
pub mod dto;
pub mod events;
pub mod payloads;
