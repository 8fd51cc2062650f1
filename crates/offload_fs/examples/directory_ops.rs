// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Directory operations: creating, listing, copying, and removing trees.
//!
//! Runs the same work twice, once with the blocking forms and once with the
//! non-blocking forms whose callbacks land on an event loop.

use offload_fs::{EventLoop, FileSystem, UnitId};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();

    let event_loop = EventLoop::spawn("example-loop")?;
    let fs = FileSystem::new(event_loop.clone())?;

    // Blocking forms: build a small tree and inspect it.
    fs.mkdirs_blocking(root.join("src/utils"), Some("rwxr-x---"))?;
    fs.write_file_blocking(root.join("src/main.rs"), "fn main() {}")?;
    fs.write_file_blocking(root.join("src/utils/helpers.rs"), "// helpers")?;
    fs.write_file_blocking(root.join("README.md"), "# Example")?;

    println!("root entries:");
    for path in fs.read_dir_blocking(root, None)? {
        let kind = if fs.props_blocking(&path)?.is_directory() { "dir" } else { "file" };
        println!("  [{kind}] {}", path.display());
    }

    println!("\nrust sources in src/:");
    for path in fs.read_dir_blocking(root.join("src"), Some(r".*\.rs"))? {
        println!("  {}", path.display());
    }

    // Non-blocking forms: copy the tree, then list and remove the copy. Each
    // callback runs on the event loop and starts the next step.
    let (done_tx, done_rx) = flume::bounded::<Result<(), String>>(1);
    let copy = root.join("copy");
    let chained = fs.clone();
    let copy_for_list = copy.clone();

    fs.copy_recursive(root.join("src"), &copy, true, move |result| {
        println!("\ncopy finished on {:?}", UnitId::current());
        if let Err(e) = result {
            let _ = done_tx.send(Err(e.to_string()));
            return;
        }

        let next = chained.clone();
        let listed = copy_for_list.clone();
        chained.read_dir(&listed, None, move |result| {
            match result {
                Ok(entries) => println!("copy contains {} entries", entries.len()),
                Err(e) => println!("listing failed: {e}"),
            }
            next.delete_recursive(&copy_for_list, true, move |result| {
                println!("copy deleted");
                let _ = done_tx.send(result.map_err(|e| e.to_string()));
            });
        });
    });

    done_rx.recv()??;
    println!("copy still exists: {}", fs.exists_blocking(&copy));

    event_loop.shutdown();
    Ok(())
}
