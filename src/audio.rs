//! Audio input: PCM capture into a rotating ring and the frame tap thread.

pub mod capture;
