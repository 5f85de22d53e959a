use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use vpm_core::config::FetchConfig;
use vpm_core::Error;
use vpm_media::ImageResolver;

fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Serve one connection on an ephemeral port with `respond`; returns the base URL.
fn serve_once<F>(respond: F) -> String
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            read_request(&mut stream);
            respond(stream);
        }
    });
    format!("http://{addr}")
}

fn resolver(timeout_secs: u64) -> ImageResolver {
    let tmp = std::env::temp_dir();
    ImageResolver::new(tmp, &FetchConfig { timeout_secs, ..FetchConfig::default() })
}

#[test]
fn ok_response_is_decoded() {
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 4, Rgb([1, 2, 3])))
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    let base = serve_once(move |mut stream| {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            png.len()
        );
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(&png).unwrap();
    });

    let img = resolver(5).load_image(&format!("{base}/item.png")).unwrap();
    assert_eq!(img.dimensions(), (6, 4));
}

#[test]
fn non_success_status_is_a_remote_fetch_error() {
    let base = serve_once(|mut stream| {
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .unwrap();
    });

    let err = resolver(5).read_bytes(&format!("{base}/missing.png")).unwrap_err();
    assert!(matches!(err, Error::RemoteFetch(ref msg) if msg.contains("404")), "{err}");
}

#[test]
fn stalled_server_is_a_timeout() {
    let base = serve_once(|stream| {
        thread::sleep(Duration::from_secs(4));
        drop(stream);
    });

    let err = resolver(1).fetch(&format!("{base}/slow.png")).unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "{err}");
    assert!(err.is_item_level());
}
