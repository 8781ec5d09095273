use std::fmt;
use std::str::FromStr;

/// Request methods understood by the engine, including the WebDAV set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Head,
    Delete,
    Trace,
    MkCol,
    Copy,
    Move,
    Options,
    Lock,
    Unlock,
    PropFind,
    PropPatch,
    BCopy,
    BDelete,
    BMove,
    BPropFind,
    BPropPatch,
    Notify,
    Poll,
    Search,
    Subscribe,
    Unsubscribe,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        use self::Method::*;
        match *self {
            Get => "GET",
            Post => "POST",
            Put => "PUT",
            Head => "HEAD",
            Delete => "DELETE",
            Trace => "TRACE",
            MkCol => "MKCOL",
            Copy => "COPY",
            Move => "MOVE",
            Options => "OPTIONS",
            Lock => "LOCK",
            Unlock => "UNLOCK",
            PropFind => "PROPFIND",
            PropPatch => "PROPPATCH",
            BCopy => "BCOPY",
            BDelete => "BDELETE",
            BMove => "BMOVE",
            BPropFind => "BPROPFIND",
            BPropPatch => "BPROPPATCH",
            Notify => "NOTIFY",
            Poll => "POLL",
            Search => "SEARCH",
            Subscribe => "SUBSCRIBE",
            Unsubscribe => "UNSUBSCRIBE",
        }
    }

    /// True for the methods that upload a request body
    pub fn has_body(&self) -> bool {
        matches!(*self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ();
    fn from_str(s: &str) -> Result<Method, ()> {
        use self::Method::*;
        match s {
            "GET" => Ok(Get),
            "POST" => Ok(Post),
            "PUT" => Ok(Put),
            "HEAD" => Ok(Head),
            "DELETE" => Ok(Delete),
            "TRACE" => Ok(Trace),
            "MKCOL" => Ok(MkCol),
            "COPY" => Ok(Copy),
            "MOVE" => Ok(Move),
            "OPTIONS" => Ok(Options),
            "LOCK" => Ok(Lock),
            "UNLOCK" => Ok(Unlock),
            "PROPFIND" => Ok(PropFind),
            "PROPPATCH" => Ok(PropPatch),
            "BCOPY" => Ok(BCopy),
            "BDELETE" => Ok(BDelete),
            "BMOVE" => Ok(BMove),
            "BPROPFIND" => Ok(BPropFind),
            "BPROPPATCH" => Ok(BPropPatch),
            "NOTIFY" => Ok(Notify),
            "POLL" => Ok(Poll),
            "SEARCH" => Ok(Search),
            "SUBSCRIBE" => Ok(Subscribe),
            "UNSUBSCRIBE" => Ok(Unsubscribe),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Method;

    #[test]
    fn from_str() {
        assert_eq!("GET".parse::<Method>(), Ok(Method::Get));
        assert_eq!("PROPFIND".parse::<Method>(), Ok(Method::PropFind));
        assert_eq!("BPROPPATCH".parse::<Method>(), Ok(Method::BPropPatch));
        assert!("get".parse::<Method>().is_err());
        assert!("PATCH".parse::<Method>().is_err());
    }

    #[test]
    fn wire_token() {
        assert_eq!(Method::MkCol.as_str(), "MKCOL");
        assert_eq!(format!("{}", Method::Unsubscribe), "UNSUBSCRIBE");
    }

    #[test]
    fn body_methods() {
        assert!(Method::Post.has_body());
        assert!(Method::Put.has_body());
        assert!(!Method::Get.has_body());
        assert!(!Method::Head.has_body());
    }
}
