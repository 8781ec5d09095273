bitflags! {
    /// Client option bits
    ///
    /// `MOVED` and `REDIRECTED` are set by the engine itself when the
    /// respective redirect has been followed; the rest are configuration.
    pub struct Flags: u32 {
        /// Resume an interrupted download into the output file
        const RESUME                = 0x0001;
        /// Report failures through the host's message facility
        const MESSAGE               = 0x0002;
        /// A 301 redirect has been followed for this request
        const MOVED                 = 0x0004;
        /// A 307 redirect has been followed for this request
        const REDIRECTED            = 0x0008;
        /// Do not pre-authenticate uploads with a HEAD request
        const NO_HEAD               = 0x0010;
        /// Never invoke the credential prompt on a 401
        const NO_DIALOG             = 0x0020;
        /// Send and receive bodies without transfer encoding
        const RAW                   = 0x0040;
        /// Verbose logging of socket activity
        const DEBUG_SOCKET          = 0x0080;
        /// Accumulate the response body in the in-memory receive buffer
        const RECV_BUFFER           = 0x0100;
        /// Verbose logging of the request lifecycle
        const DEBUG                 = 0x0200;
        /// Use TLS for the connection
        const SSL                   = 0x0400;
        /// Log response headers as they are parsed
        const LOG_ALL               = 0x0800;
        /// Skip certificate verification on TLS connections
        const DISABLE_SERVER_VERIFY = 0x1000;
        /// Track object references handed to the sinks
        const ENFORCE_TRACKING      = 0x2000;
    }
}

impl Default for Flags {
    fn default() -> Flags {
        Flags::empty()
    }
}
