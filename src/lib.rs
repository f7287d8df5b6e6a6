
// External data representation, the big-endian encoding VXI-11 calls are made of
pub mod xdr;

// ONC remote procedure calls over TCP, and the port mapper that finds the VXI-11 core channel
pub mod rpc;

// Instrument links on top of RPC: create a link, write, read, destroy
pub mod vxi11;

// Text command sessions on top of a VXI-11 link
pub mod scpi;

pub mod error;

// The capability interface sweeps are written against, plus offline stand-ins
pub mod equipment;

// Triangular bias waveform and its critical/retrapping branches
pub mod sweep;

// Critical currents, resistance fits, derivatives and statistics
pub mod analysis;

// Magnetic field sweeps and the two ways of driving a magnet
pub mod field;

// Setpoint iteration with stability detection, and the shared thermometer
pub mod temperature;

// Drivers for the instruments on the cryostat rack
pub mod devices;

// I-V curves, outer sweep loops, cancellation, plot feed and thermometer logging
pub mod measurement;

// Tables, output folders and run logs on disk
pub mod persist;

pub mod config;
