#![allow(dead_code)]

use std::path::{Path, PathBuf};

/// Write an executable shell script into `dir` and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// A fake 7z: canned listings by archive basename, selective extraction
/// that materializes files matching the scenario.
#[cfg(unix)]
pub fn fake_seven_zip(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "fake7z",
        r#"#!/bin/sh
CMD=$1; shift
ARCHIVE=""; PATTERN=""; DEST=""
for a in "$@"; do
  case "$a" in
    -o*) DEST=${a#-o} ;;
    -r|-y) ;;
    *) if [ -z "$ARCHIVE" ]; then ARCHIVE=$a; else PATTERN=$a; fi ;;
  esac
done
BASE=$(basename "$ARCHIVE")
case "$CMD" in
  l)
    case "$BASE" in
      malware.zip) echo "crack.exe"; echo "notes.tvw" ;;
      dropper.zip) echo "chinafix tools"; echo "board.tvw" ;;
      inner.zip) echo "keygen.exe" ;;
      broken.zip) exit 2 ;;
      *) echo "boardview.tvw" ;;
    esac ;;
  x)
    mkdir -p "$DEST"
    if [ "$BASE" = "malware.zip" ] && [ "$PATTERN" = "*.tvw" ]; then
      printf 'salvaged' > "$DEST/notes.tvw"
    fi
    if [ "$BASE" = "dropper.zip" ] && [ "$PATTERN" = "*.tvw" ]; then
      printf 'payload' > "$DEST/board.tvw"
      printf 'PK' > "$DEST/inner.zip"
    fi
    ;;
esac
exit 0
"#,
    )
}

/// A stand-in rclone working over plain directory paths: copyto copies one
/// file, copy/sync honors --files-from and emits completion lines the way
/// the real tool does with --use-json-log.
#[cfg(unix)]
pub fn mock_rclone(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "mockrclone",
        r#"#!/bin/sh
VERB=$1; shift
SRC=""; DST=""; FILES_FROM=""
while [ $# -gt 0 ]; do
  case "$1" in
    --files-from) FILES_FROM=$2; shift 2 ;;
    --exclude-from|--exclude|--transfers|--checkers|--retries|--retries-sleep|--low-level-retries|--contimeout|--timeout|--stats|--log-level|--config) shift 2 ;;
    --*) shift ;;
    *) if [ -z "$SRC" ]; then SRC=$1; elif [ -z "$DST" ]; then DST=$1; fi; shift ;;
  esac
done
case "$VERB" in
  copyto)
    [ -f "$SRC" ] || exit 1
    mkdir -p "$(dirname "$DST")"
    cp "$SRC" "$DST"
    ;;
  copy|sync)
    if [ -n "$FILES_FROM" ]; then
      while IFS= read -r f; do
        [ -z "$f" ] && continue
        [ -f "$SRC/$f" ] || continue
        mkdir -p "$DST/$(dirname "$f")"
        cp "$SRC/$f" "$DST/$f"
        printf '{"level":"info","msg":"Copied (new)","object":"%s"}\n' "$f" >&2
      done < "$FILES_FROM"
    else
      mkdir -p "$DST"
      cp -r "$SRC/." "$DST/"
    fi
    ;;
esac
exit 0
"#,
    )
}
